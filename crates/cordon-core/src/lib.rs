//! # Cordon Core
//!
//! Core traits, types, and errors for the Cordon consensus test harness.
//!
//! Cordon sits between a set of consensus participants and a test driver.
//! Every participant-to-participant message is routed through a harness
//! owned link so the driver decides when each one is delivered. This crate
//! holds the pieces that do not touch the network.
//!
//! ## Key Traits
//!
//! - [`CommandTarget`]: Anything that accepts a command and returns a reply
//!   (a real node handle, or an in-process stand-in for tests)
//!
//! ## Key Types
//!
//! - [`NodeId`]: Ordinal identity of a participant (1..=N)
//! - [`Frame`] / [`Command`]: RESP values and the typed request built from them
//! - [`SlotRange`]: A participant's share of the 16384-slot keyspace
//! - [`AddressAllocator`]: Deterministic per-pair link addresses
//! - [`ClusterSetCommand`]: The routing configuration pushed to each node
//! - [`MessageSummary`]: Best-effort diagnostic view of an internal message

pub mod address;
pub mod cluster;
pub mod diagnostic;
pub mod error;
pub mod frame;
pub mod identity;
pub mod keyspace;
pub mod traits;

// Re-export main types
pub use address::{AddressAllocator, DEFAULT_BASE_PORT, DEFAULT_LINK_STRIDE, DEFAULT_NODE_STRIDE};
pub use cluster::{CLUSTER_SET_COMMAND, ClusterEntry, ClusterSetCommand, UNUSED_FIELD};
pub use diagnostic::{INNER_MESSAGE_COMMAND, MessageSummary, decode_summary, summarize};
pub use error::*;
pub use frame::{Command, Frame};
pub use identity::NodeId;
pub use keyspace::{SlotRange, TOTAL_SLOTS, partition_slots};
pub use traits::CommandTarget;
