//! Harness configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cordon_core::{AddressAllocator, DEFAULT_BASE_PORT, DEFAULT_LINK_STRIDE, DEFAULT_NODE_STRIDE};
use cordon_transport::HandleConfig;

use crate::error::{HarnessError, HarnessResult};

/// Environment variable overriding [`HarnessConfig::host`]
pub const ENV_HOST: &str = "CORDON_HOST";
/// Environment variable overriding [`HarnessConfig::base_port`]
pub const ENV_BASE_PORT: &str = "CORDON_BASE_PORT";
/// Environment variable overriding [`HarnessConfig::drain_timeout_ms`]
pub const ENV_DRAIN_TIMEOUT_MS: &str = "CORDON_DRAIN_TIMEOUT_MS";
/// Environment variable overriding [`HarnessConfig::drain_mode`]
pub const ENV_DRAIN_MODE: &str = "CORDON_DRAIN_MODE";

/// How much one drain step releases from a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    /// At most one message per link per step
    #[default]
    Single,
    /// Everything queued, until the link stays empty for the drain timeout
    Exhaust,
}

impl fmt::Display for DrainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainMode::Single => write!(f, "single"),
            DrainMode::Exhaust => write!(f, "exhaust"),
        }
    }
}

impl FromStr for DrainMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(DrainMode::Single),
            "exhaust" => Ok(DrainMode::Exhaust),
            _ => Err(HarnessError::InvalidConfig {
                key: ENV_DRAIN_MODE.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration for a harness session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Host links bind on and advertise to participants
    pub host: String,
    /// First link port (0 lets the OS pick every port)
    pub base_port: u16,
    /// Port distance between consecutive participants' link blocks
    pub node_stride: u16,
    /// Port distance between links within one block
    pub link_stride: u16,
    /// How long a drain step waits on an empty link, in milliseconds
    pub drain_timeout_ms: u64,
    /// Default drain mode
    pub drain_mode: DrainMode,
    /// Run one full drain pass right after publishing the topology
    pub settle_on_start: bool,
    /// Settings for the per-participant node handles
    pub handle: HandleConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: DEFAULT_BASE_PORT,
            node_stride: DEFAULT_NODE_STRIDE,
            link_stride: DEFAULT_LINK_STRIDE,
            drain_timeout_ms: 100,
            drain_mode: DrainMode::Single,
            settle_on_start: true,
            handle: HandleConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults, but with OS-assigned link ports
    ///
    /// Lets several harnesses run side by side, e.g. parallel tests.
    pub fn ephemeral() -> Self {
        Self {
            base_port: 0,
            ..Default::default()
        }
    }

    /// Defaults overlaid with the `CORDON_*` environment variables
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = lookup(ENV_BASE_PORT) {
            config.base_port = parse_value(ENV_BASE_PORT, &port)?;
        }
        if let Some(ms) = lookup(ENV_DRAIN_TIMEOUT_MS) {
            config.drain_timeout_ms = parse_value(ENV_DRAIN_TIMEOUT_MS, &ms)?;
        }
        if let Some(mode) = lookup(ENV_DRAIN_MODE) {
            config.drain_mode = mode.parse()?;
        }

        Ok(config)
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the base port
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    /// Set both port strides
    pub fn with_strides(mut self, node_stride: u16, link_stride: u16) -> Self {
        self.node_stride = node_stride;
        self.link_stride = link_stride;
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the drain mode
    pub fn with_drain_mode(mut self, mode: DrainMode) -> Self {
        self.drain_mode = mode;
        self
    }

    /// Enable or disable the settle pass after publishing
    pub fn with_settle_on_start(mut self, settle: bool) -> Self {
        self.settle_on_start = settle;
        self
    }

    /// Set the node handle configuration
    pub fn with_handle_config(mut self, handle: HandleConfig) -> Self {
        self.handle = handle;
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Address allocator for this configuration
    pub fn allocator(&self) -> AddressAllocator {
        AddressAllocator::new(self.host.clone(), self.base_port)
            .with_strides(self.node_stride, self.link_stride)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> HarnessResult<T> {
    value.trim().parse().map_err(|_| HarnessError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    })
}
