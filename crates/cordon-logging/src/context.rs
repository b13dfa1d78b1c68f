//! Participant context injection for harness logging
//!
//! This module provides thread-local storage for the participant (or link)
//! a piece of work belongs to, so spans opened inside a scope can be tagged
//! with it by [`ParticipantContextLayer`](crate::layers::ParticipantContextLayer).
//!
//! The context is thread-local: in async code hold the guard only while
//! opening a span, then instrument the future with that span.

use std::cell::RefCell;
use std::fmt;

use cordon_core::NodeId;
use uuid::Uuid;

/// What a context scope refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextScope {
    /// Work done on behalf of one participant
    Participant(NodeId),
    /// Work done by the link carrying `from -> to` traffic
    Link { from: NodeId, to: NodeId },
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextScope::Participant(id) => write!(f, "node-{}", id),
            ContextScope::Link { from, to } => write!(f, "{}->{}", from, to),
        }
    }
}

/// Context data stored in thread-local storage
#[derive(Debug, Clone)]
pub struct ParticipantContextData {
    /// What the scope refers to
    pub scope: ContextScope,
    /// Unique id for this scope instance
    pub instance_id: Uuid,
}

thread_local! {
    static PARTICIPANT_CONTEXT: RefCell<Option<ParticipantContextData>> = const { RefCell::new(None) };
}

/// RAII guard for participant context
///
/// When this guard is created, it sets the context for the current thread.
/// When it's dropped, it restores the previous context (if any).
///
/// # Example
///
/// ```ignore
/// use cordon_core::NodeId;
/// use cordon_logging::ParticipantContextGuard;
///
/// let span = {
///     let _guard = ParticipantContextGuard::link(from, to);
///     tracing::debug_span!("drain")
/// };
/// link.drain(wait).instrument(span).await?;
/// ```
pub struct ParticipantContextGuard {
    previous: Option<ParticipantContextData>,
}

impl ParticipantContextGuard {
    /// Enter a scope with a fresh instance id
    pub fn new(scope: ContextScope) -> Self {
        Self::with_instance_id(scope, Uuid::new_v4())
    }

    /// Enter a participant scope
    pub fn participant(id: NodeId) -> Self {
        Self::new(ContextScope::Participant(id))
    }

    /// Enter a link scope
    pub fn link(from: NodeId, to: NodeId) -> Self {
        Self::new(ContextScope::Link { from, to })
    }

    /// Enter a scope with a specific instance id
    ///
    /// Useful to keep one id across every drain of the same run.
    pub fn with_instance_id(scope: ContextScope, instance_id: Uuid) -> Self {
        let data = ParticipantContextData { scope, instance_id };
        let previous = PARTICIPANT_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Get the current context (if any)
    pub fn current() -> Option<ParticipantContextData> {
        PARTICIPANT_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current scope label, e.g. `node-3` or `1->2`
    pub fn current_label() -> Option<String> {
        Self::current().map(|ctx| ctx.scope.to_string())
    }

    /// Get the current instance ID (if set)
    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for ParticipantContextGuard {
    fn drop(&mut self) {
        PARTICIPANT_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Convenience macro to run a block inside a participant scope
///
/// # Example
///
/// ```ignore
/// with_participant_context!(node, {
///     tracing::info!("Publishing cluster set");
/// });
/// ```
#[macro_export]
macro_rules! with_participant_context {
    ($id:expr, $body:block) => {{
        let _guard = $crate::context::ParticipantContextGuard::participant($id);
        $body
    }};
}
