//! # Cordon Harness
//!
//! Deterministic message delivery for testing distributed consensus
//! participants.
//!
//! ## Overview
//!
//! Participants never talk to each other directly. Every ordered pair
//! (from, to) gets its own intercepting link, and a participant is told to
//! reach each peer through the link for that pair. Messages pile up in the
//! link until the test releases them, so the test decides exactly which
//! message arrives where and when:
//!
//! - **Partitions**: simply never drain between two groups
//! - **Reordering across pairs**: drain pairs in whatever order the test likes
//! - **FIFO within a pair**: a link always releases its oldest message first
//!
//! ## Architecture
//!
//! - **Config** (`config.rs`): Ports, drain timing and drain mode
//! - **Topology** (`topology.rs`): One link per ordered pair, slot partition,
//!   routing configuration published to each participant
//! - **Drain** (`drain.rs`): Test-facing delivery control
//! - **Session** (`session.rs`): Connects everything for one test
//!
//! ## Example
//!
//! ```rust,ignore
//! use cordon_harness::*;
//!
//! let harness = Harness::connect(HarnessConfig::default(), &[
//!     "127.0.0.1:6379",
//!     "127.0.0.1:6380",
//!     "127.0.0.1:6381",
//! ]).await?;
//!
//! let [n1, n2] = [1, 2].map(|n| NodeId::new(n).unwrap());
//!
//! // Node 1 proposes; only node 2 hears about it
//! harness.participant(n1)?.execute("rg.testconsensusset", ["x"]).await?;
//! harness.participant(n1)?.pass_messages_to(&[n2]).await?;
//!
//! // Heal the partition and let everything settle
//! harness.drain_all().await?;
//! ```

pub mod config;
pub mod drain;
pub mod error;
pub mod session;
pub mod topology;

pub use config::{
    DrainMode, ENV_BASE_PORT, ENV_DRAIN_MODE, ENV_DRAIN_TIMEOUT_MS, ENV_HOST, HarnessConfig,
};
pub use drain::DrainController;
pub use error::{HarnessError, HarnessResult};
pub use session::{Harness, Participant};
pub use topology::TopologyController;

pub use cordon_core::{Command, CommandError, CommandTarget, Frame, NodeId};
pub use cordon_transport::{HandleConfig, InterceptingLink, LinkState, NodeHandle};
