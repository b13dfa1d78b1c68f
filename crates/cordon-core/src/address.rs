//! Deterministic link address allocation
//!
//! Every ordered pair (from, to) gets its own listening port:
//!
//! ```text
//! port(from, to) = base + (from - 1) * node_stride + rank(to) * link_stride
//! ```
//!
//! where `rank(to)` is the position of `to` among the participants other
//! than `from`. With the defaults, participant 1 listens on 10000, 10002, ...
//! for its peers, participant 2 on 10100, 10102, ... and so on.
//!
//! A base port of `0` asks the OS for an ephemeral port per link instead;
//! the caller then publishes whatever address the listener actually bound.

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::identity::NodeId;

/// Default first port handed out
pub const DEFAULT_BASE_PORT: u16 = 10000;
/// Default port distance between two participants' blocks
pub const DEFAULT_NODE_STRIDE: u16 = 100;
/// Default port distance between two links of the same participant
pub const DEFAULT_LINK_STRIDE: u16 = 2;

/// Hands out link addresses without any global state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAllocator {
    /// Host every link listens on and that nodes are told to dial
    pub host: String,
    /// First port, or 0 for ephemeral ports
    pub base_port: u16,
    /// Port distance between participant blocks
    pub node_stride: u16,
    /// Port distance between links inside one block
    pub link_stride: u16,
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_BASE_PORT)
    }
}

impl AddressAllocator {
    /// Allocator with the default strides
    pub fn new(host: impl Into<String>, base_port: u16) -> Self {
        Self {
            host: host.into(),
            base_port,
            node_stride: DEFAULT_NODE_STRIDE,
            link_stride: DEFAULT_LINK_STRIDE,
        }
    }

    /// Allocator that lets the OS pick every port
    pub fn ephemeral(host: impl Into<String>) -> Self {
        Self::new(host, 0)
    }

    /// Override both strides
    pub fn with_strides(mut self, node_stride: u16, link_stride: u16) -> Self {
        self.node_stride = node_stride;
        self.link_stride = link_stride;
        self
    }

    /// Whether ports are chosen by the OS
    pub fn is_ephemeral(&self) -> bool {
        self.base_port == 0
    }

    /// Check that `count` participants fit without overlapping ports
    pub fn validate(&self, count: usize) -> Result<(), TopologyError> {
        if count == 0 {
            return Err(TopologyError::NoParticipants);
        }
        if self.is_ephemeral() || count == 1 {
            return Ok(());
        }

        let peers = count - 1;
        let block = peers * usize::from(self.link_stride);
        if self.link_stride == 0 || self.node_stride == 0 || block > usize::from(self.node_stride)
        {
            return Err(TopologyError::StrideCollision {
                link_stride: self.link_stride,
                peers,
                node_stride: self.node_stride,
            });
        }

        // The highest port belongs to the last participant's link to its
        // highest-ranked peer
        let count = u16::try_from(count).map_err(|_| TopologyError::TooManyParticipants {
            count,
            max: usize::from(u16::MAX),
        })?;
        let last = NodeId::try_from(count)?;
        let peer = NodeId::try_from(count - 1)?;
        self.port(last, peer).map(|_| ())
    }

    /// Port reserved for the link carrying `from`'s traffic to `to`
    ///
    /// Returns 0 for an ephemeral allocator.
    pub fn port(&self, from: NodeId, to: NodeId) -> Result<u16, TopologyError> {
        if self.is_ephemeral() {
            return Ok(0);
        }

        let rank = if to < from { to.index() } else { to.index() - 1 };
        let port = usize::from(self.base_port)
            + from.index() * usize::from(self.node_stride)
            + rank * usize::from(self.link_stride);

        u16::try_from(port).map_err(|_| TopologyError::PortOverflow {
            from: from.get(),
            to: to.get(),
        })
    }

    /// `host:port` string a link for (from, to) binds to
    pub fn address(&self, from: NodeId, to: NodeId) -> Result<String, TopologyError> {
        Ok(format!("{}:{}", self.host, self.port(from, to)?))
    }
}
