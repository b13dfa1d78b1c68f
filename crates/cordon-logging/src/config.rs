//! Logging configuration
//!
//! Three presets cover the usual runs: [`LogConfig::development`] for reading
//! a scenario as it unfolds, [`LogConfig::testing`] for `cargo test`, and
//! [`LogConfig::production`] for long soak runs that should leave JSONL
//! files behind.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Target that logs one `debug` event per released message
pub const DELIVERY_TARGET: &str = "cordon_transport::link";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for everything not named in `filters` (`RUST_LOG` wins when set)
    pub level: String,
    pub console: ConsoleFormat,
    /// JSONL file output, if any
    pub file: Option<FileOutput>,
    /// Fields included in JSONL records (console and file alike)
    pub json: JsonLayout,
    pub filters: FilterConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleFormat::Json,
            file: None,
            json: JsonLayout::default(),
            filters: FilterConfig::default(),
        }
    }
}

impl LogConfig {
    /// Colored human-readable console output with every delivery logged
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Default::default()
        }
    }

    /// Warnings only, routed through the test output capture
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleFormat::Captured,
            ..Default::default()
        }
    }

    /// JSONL files under `directory`, rotated daily, a month kept; no console
    pub fn production(directory: PathBuf) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileOutput {
                directory,
                keep: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.console = console;
        self
    }

    pub fn with_file(mut self, file: FileOutput) -> Self {
        self.file = Some(file);
        self
    }

    /// Override the level for one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.filters.targets.insert(target.into(), level.into());
        self
    }

    /// Log every released message regardless of the overall level
    pub fn with_deliveries(self) -> Self {
        self.with_target(DELIVERY_TARGET, "debug")
    }

    /// Directive string for `EnvFilter`
    ///
    /// With `only` set, everything else is off and the listed crates log at
    /// `level`. Per-target levels come next, silenced crates last.
    pub fn filter_directives(&self) -> String {
        let mut directives = if self.filters.only.is_empty() {
            vec![self.level.clone()]
        } else {
            std::iter::once("off".to_string())
                .chain(self.filters.only.iter().map(|name| format!("{}={}", name, self.level)))
                .collect()
        };

        directives.extend(
            self.filters
                .targets
                .iter()
                .map(|(target, level)| format!("{}={}", target, level)),
        );
        directives.extend(self.filters.silenced.iter().map(|name| format!("{}=off", name)));

        directives.join(",")
    }
}

/// Where console output goes and what it looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// No console output
    Off,
    /// JSONL on stdout
    Json,
    /// Human-readable lines on stdout
    Pretty { ansi: bool },
    /// Compact lines through the libtest capture, shown only for failing tests
    Captured,
}

/// JSONL file output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutput {
    pub directory: PathBuf,
    /// File name prefix; files end in `.log`
    pub prefix: String,
    pub rotation: LogRotation,
    /// Rotated files to keep (`None` keeps all)
    pub keep: Option<usize>,
}

impl Default for FileOutput {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "cordon".to_string(),
            rotation: LogRotation::Daily,
            keep: Some(7),
        }
    }
}

/// When file output starts a new file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    /// One `<prefix>.log`, truncated when logging starts
    Never,
}

/// Fields included in each JSONL record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLayout {
    /// Event fields at the top level instead of under `fields`
    pub flatten_events: bool,
    /// All entered spans, outermost first
    pub span_list: bool,
    /// The innermost span
    pub current_span: bool,
    pub thread_info: bool,
    /// Source file and line
    pub location: bool,
}

impl Default for JsonLayout {
    fn default() -> Self {
        Self {
            flatten_events: true,
            span_list: true,
            current_span: true,
            thread_info: false,
            location: true,
        }
    }
}

/// Per-crate and per-target filtering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// When non-empty, only these crates log at all
    pub only: Vec<String>,
    /// Crates turned off entirely
    pub silenced: Vec<String>,
    /// Level overrides by target
    pub targets: BTreeMap<String, String>,
}
