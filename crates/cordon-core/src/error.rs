//! Error types for Cordon

use thiserror::Error;

/// Errors raised while framing or parsing RESP traffic
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid frame type byte: {0:#04x}")]
    InvalidTypeByte(u8),

    #[error("Invalid integer: {0}")]
    InvalidInteger(String),

    #[error("Invalid length: {0}")]
    InvalidLength(i64),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Bulk string not terminated by CRLF")]
    MissingTerminator,

    #[error("Arrays nested deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("Not a command: {0}")]
    NotACommand(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned when issuing a command to a node
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The node answered with a RESP error reply
    #[error("Node replied with error: {0}")]
    Server(String),
}

/// Errors from the best-effort diagnostic decoder
///
/// These never leave the logging path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Not an internal consensus message: {0}")]
    NotInnerMessage(String),

    #[error("Missing argument at index {0}")]
    MissingArgument(usize),

    #[error("Truncated payload: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid name length: {0}")]
    InvalidNameLength(u64),
}

/// Errors in topology construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Topology needs at least one participant")]
    NoParticipants,

    #[error("Too many participants: {count} (max: {max})")]
    TooManyParticipants { count: usize, max: usize },

    #[error("Invalid node id: {0}")]
    InvalidNodeId(u16),

    #[error("Invalid node id text: {0:?}")]
    InvalidNodeIdText(String),

    #[error("Link port for {from}->{to} overflows the port range")]
    PortOverflow { from: u16, to: u16 },

    #[error("Link stride {link_stride} x {peers} peers overlaps node stride {node_stride}")]
    StrideCollision {
        link_stride: u16,
        peers: usize,
        node_stride: u16,
    },
}

/// Errors parsing a cluster-set configuration command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterSetError {
    #[error("Expected {expected}, got {actual}")]
    WrongCommand { expected: String, actual: String },

    #[error("Too few arguments: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid field at argument {index}: {value:?}")]
    InvalidField { index: usize, value: String },

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
}
