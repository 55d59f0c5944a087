//! Queue status snapshot.

use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of the ingestion queue.
///
/// Recomputed on demand from live counters; never mutated in place.  This is
/// the only surface through which operators observe backpressure and drops,
/// so it carries both instantaneous occupancy and the cumulative counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Events currently buffered and awaiting flush.
    pub current_size: usize,
    /// Configured queue capacity.
    pub capacity: usize,
    /// Occupancy as an integer percentage of capacity.
    pub percent_full: u8,
    /// Cumulative count of events accepted into the chain.
    pub total_accepted: u64,
    /// Cumulative count of low-priority events dropped under backpressure.
    /// Monotonic, never decreases.
    pub dropped_entries: u64,
    /// The current chain tip hash.
    pub last_hash: String,
    /// True when enough entries have accumulated that a flush is due.
    pub needs_flush: bool,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "queue {}/{} ({}%), accepted {}, dropped {}, needs_flush {}",
            self.current_size,
            self.capacity,
            self.percent_full,
            self.total_accepted,
            self.dropped_entries,
            self.needs_flush
        )
    }
}
