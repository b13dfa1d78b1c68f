//! Structured logging for the Cordon harness
//!
//! Every message the harness releases can be traced back to the link that
//! held it and the participants on either side. This crate installs the
//! subscriber that makes those logs readable, and tags spans with the
//! participant or link being driven.
//!
//! # Quick Start
//!
//! ```ignore
//! use cordon_logging::{HarnessSubscriberBuilder, LogConfig};
//!
//! // JSONL on stdout at info
//! HarnessSubscriberBuilder::new().init();
//!
//! // Readable output, one line per released message
//! HarnessSubscriberBuilder::new()
//!     .with_config(LogConfig::development().with_deliveries())
//!     .init();
//!
//! // In tests: quiet, captured, and safe to call from every test
//! cordon_logging::init_testing();
//! ```
//!
//! # Participant Context
//!
//! Spans opened while a [`ParticipantContextGuard`] is alive remember which
//! participant or link they belong to, even after the guard is gone:
//!
//! ```ignore
//! use cordon_logging::ParticipantContextGuard;
//!
//! let span = {
//!     let _guard = ParticipantContextGuard::link(from, to);
//!     tracing::debug_span!("drain")
//! };
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{
    ConsoleFormat, DELIVERY_TARGET, FileOutput, FilterConfig, JsonLayout, LogConfig, LogRotation,
};
pub use context::{ContextScope, ParticipantContextData, ParticipantContextGuard};
pub use layers::{ParticipantContextExtension, ParticipantContextLayer};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid filter directives '{directives}': {message}")]
    Filter { directives: String, message: String },

    #[error("Failed to open log output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create rolling log appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Builds and installs the global subscriber
#[derive(Debug, Default)]
pub struct HarnessSubscriberBuilder {
    config: LogConfig,
}

impl HarnessSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.config.console = console;
        self
    }

    pub fn with_file_output(mut self, file: FileOutput) -> Self {
        self.config.file = Some(file);
        self
    }

    /// Install the subscriber globally
    ///
    /// Keep the returned guard alive for as long as file output is wanted.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber is already set or the log output cannot
    /// be opened.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => panic!("failed to initialize logging: {}", e),
        }
    }

    /// Install the subscriber globally, reporting failure instead of panicking
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.env_filter()?;

        let (file_writer, guard) = match &self.config.file {
            Some(file) => {
                let (writer, guard) = open_file_writer(file)?;
                (Some(writer), Some(guard))
            }
            None => (None, None),
        };

        let json = &self.config.json;
        let console = self.config.console;

        let json_console =
            (console == ConsoleFormat::Json).then(|| layers::jsonl_layer(json, std::io::stdout));
        let pretty_console = match console {
            ConsoleFormat::Pretty { ansi } => {
                Some(tracing_subscriber::fmt::layer().with_ansi(ansi).with_target(true))
            }
            _ => None,
        };
        let captured_console = (console == ConsoleFormat::Captured).then(|| {
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_test_writer()
        });
        let file_layer = file_writer.map(|writer| layers::jsonl_layer(json, writer));

        Registry::default()
            .with(filter)
            .with(ParticipantContextLayer::new())
            .with(json_console)
            .with(pretty_console)
            .with(captured_console)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }

    /// `RUST_LOG` when set, the configured directives otherwise
    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.config.filter_directives();
        EnvFilter::try_new(&directives).map_err(|e| LoggingError::Filter {
            directives,
            message: e.to_string(),
        })
    }
}

/// Open the file sink; `Never` truncates a single file, the others roll
fn open_file_writer(file: &FileOutput) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match file.rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Never => {
            fs::create_dir_all(&file.directory)?;
            let path = file.directory.join(format!("{}.log", file.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.as_str())
        .filename_suffix("log");
    if let Some(keep) = file.keep {
        builder = builder.max_log_files(keep);
    }
    let appender = builder.build(&file.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// JSONL on stdout at `info`
pub fn init_default() {
    HarnessSubscriberBuilder::new().init();
}

/// Pretty console at `debug`
pub fn init_development() {
    HarnessSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Captured warnings for tests
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = HarnessSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
