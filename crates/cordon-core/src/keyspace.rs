//! Keyspace partitioning
//!
//! The consensus module expects its cluster configuration to assign every
//! hash slot to exactly one participant. Slots are split into contiguous,
//! near-equal ranges in participant order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Total number of hash slots in the keyspace
pub const TOTAL_SLOTS: u16 = 16384;

/// Inclusive range of hash slots owned by one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    /// First slot (inclusive)
    pub start: u16,
    /// Last slot (inclusive)
    pub end: u16,
}

impl SlotRange {
    /// Number of slots covered
    pub fn len(&self) -> usize {
        usize::from(self.end) - usize::from(self.start) + 1
    }

    /// Ranges are never empty once built by [`partition_slots`]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whether `slot` falls in this range
    pub fn contains(&self, slot: u16) -> bool {
        (self.start..=self.end).contains(&slot)
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split the keyspace across `count` participants
///
/// Participant `i` (zero-based) starts at `round(i * 16384 / count)`, rounding
/// half up, and ends one slot before the next participant starts. The last
/// range always ends at slot 16383. Integer arithmetic keeps boundaries exact.
pub fn partition_slots(count: usize) -> Result<Vec<SlotRange>, TopologyError> {
    if count == 0 {
        return Err(TopologyError::NoParticipants);
    }
    let total = usize::from(TOTAL_SLOTS);
    if count > total {
        return Err(TopologyError::TooManyParticipants { count, max: total });
    }

    let total = total as u64;
    let n = count as u64;
    // round(i * total / n) == floor((2 * i * total + n) / (2 * n))
    let starts: Vec<u16> = (0..n)
        .map(|i| ((2 * i * total + n) / (2 * n)) as u16)
        .collect();

    let last_slot = TOTAL_SLOTS - 1;
    let ranges = starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).map(|next| next - 1).unwrap_or(last_slot);
            SlotRange { start, end }
        })
        .collect();

    Ok(ranges)
}
