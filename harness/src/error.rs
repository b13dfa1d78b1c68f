//! Harness error types

use cordon_core::{CommandError, NodeId, TopologyError};
use cordon_transport::LinkError;
use thiserror::Error;

/// Errors surfaced to the test driver
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Failed to connect to node {node} at {addr}: {source}")]
    Connect {
        node: NodeId,
        addr: String,
        #[source]
        source: CommandError,
    },

    /// Publishing the topology to a participant failed; the session is unusable
    #[error("Failed to configure node {node}: {source}")]
    Configuration {
        node: NodeId,
        #[source]
        source: CommandError,
    },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(NodeId),

    #[error("Participants must be numbered 1..=N: expected {expected}, found {found}")]
    ParticipantOrder { expected: NodeId, found: NodeId },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidConfig { key: String, value: String },
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
