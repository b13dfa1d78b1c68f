//! Participant identity
//!
//! Participants are numbered 1..=N, matching the ordinal the consensus
//! module itself uses in its cluster configuration.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Ordinal identity of a consensus participant
///
/// Always non-zero; `0` is reserved by the cluster-set layout as the
/// "no route" port and is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct NodeId(u16);

impl NodeId {
    /// Create an identity from its ordinal
    pub fn new(id: u16) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    /// All identities from 1 to `count` (inclusive)
    pub fn range(count: u16) -> Vec<Self> {
        (1..=count).map(Self).collect()
    }

    /// The raw ordinal
    pub fn get(&self) -> u16 {
        self.0
    }

    /// Zero-based index, handy for slicing per-participant tables
    pub fn index(&self) -> usize {
        usize::from(self.0) - 1
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for NodeId {
    type Error = TopologyError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(TopologyError::InvalidNodeId(value))
    }
}

impl From<NodeId> for u16 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl std::str::FromStr for NodeId {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u16 = s
            .trim()
            .parse()
            .map_err(|_| TopologyError::InvalidNodeIdText(s.to_string()))?;
        Self::try_from(raw)
    }
}
