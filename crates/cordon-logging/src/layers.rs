//! Custom tracing layers for the Cordon harness
//!
//! This module provides the layer that tags spans with the active
//! participant context, and the shared JSONL formatter setup.

use tracing::{Subscriber, span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::config::JsonLayout;
use crate::context::{ParticipantContextData, ParticipantContextGuard};

/// Layer that attaches participant context to new spans
///
/// Any span opened while a [`ParticipantContextGuard`] is active carries a
/// [`ParticipantContextExtension`], so the context follows the span across
/// threads and awaits.
pub struct ParticipantContextLayer;

impl ParticipantContextLayer {
    /// Create a new participant context layer
    pub fn new() -> Self {
        Self
    }
}

impl Default for ParticipantContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct ParticipantContextExtension {
    pub data: ParticipantContextData,
}

impl<S> Layer<S> for ParticipantContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let data = ParticipantContextGuard::current().or_else(|| {
            // Child spans inherit from their parent when no guard is active
            span.parent().and_then(|parent| {
                parent
                    .extensions()
                    .get::<ParticipantContextExtension>()
                    .map(|ext| ext.data.clone())
            })
        });

        if let Some(data) = data {
            span.extensions_mut().insert(ParticipantContextExtension { data });
        }
    }
}

/// Create a JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(
    layout: &JsonLayout,
    writer: W,
) -> tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(layout.current_span)
        .with_span_list(layout.span_list)
        .flatten_event(layout.flatten_events)
        .with_file(layout.location)
        .with_line_number(layout.location)
        .with_thread_ids(layout.thread_info)
        .with_thread_names(layout.thread_info)
        .with_writer(writer)
}
