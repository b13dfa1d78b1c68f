//! Transport layer error types

use cordon_core::{CommandError, NodeId};
use thiserror::Error;

/// Errors raised by an intercepting link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to bind link {from}->{to} on {addr}: {source}")]
    Bind {
        from: NodeId,
        to: NodeId,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The drained message was removed from the queue but could not be
    /// delivered; it is not retried
    #[error("Forwarding {from}->{to} failed: {source}")]
    Forward {
        from: NodeId,
        to: NodeId,
        #[source]
        source: CommandError,
    },

    #[error("Link {from}->{to} already started")]
    AlreadyStarted { from: NodeId, to: NodeId },

    #[error("Link {from}->{to} is stopped")]
    Stopped { from: NodeId, to: NodeId },
}

impl LinkError {
    /// The (from, to) pair the failing link serves
    pub fn pair(&self) -> (NodeId, NodeId) {
        match self {
            LinkError::Bind { from, to, .. }
            | LinkError::Forward { from, to, .. }
            | LinkError::AlreadyStarted { from, to }
            | LinkError::Stopped { from, to } => (*from, *to),
        }
    }
}
