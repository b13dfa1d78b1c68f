//! # Cordon Transport
//!
//! Network side of the Cordon harness.
//!
//! Provides the RESP codec, the harness's own client connections to
//! participants, and the intercepting links that stand between them.
//!
//! ## Features
//!
//! - RESP2 framing via `tokio_util::codec`
//! - [`NodeHandle`]: one-at-a-time request/response client per participant
//! - [`InterceptingLink`]: per-pair listener that queues traffic until drained
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cordon_core::NodeId;
//! use cordon_transport::{HandleConfig, InterceptingLink, NodeHandle};
//!
//! let two = NodeId::new(2).unwrap();
//! let handle = Arc::new(NodeHandle::connect(two, "127.0.0.1:6380", HandleConfig::default()).await?);
//!
//! // Node 1 is configured to reach node 2 through this address
//! let link = InterceptingLink::new(NodeId::new(1).unwrap(), two, "127.0.0.1:10000", handle);
//! link.start().await?;
//!
//! // Later: deliver everything node 1 sent to node 2 so far
//! let released = link.drain(Duration::from_millis(500)).await?;
//! ```

pub mod connection;
pub mod error;
pub mod link;
pub mod protocol;

// Re-export main types
pub use connection::{HandleConfig, NodeHandle};
pub use error::LinkError;
pub use link::{InterceptingLink, LinkState};
pub use protocol::{MAX_BULK_LEN, RespCodec, encode_frame, frame_to_bytes};
