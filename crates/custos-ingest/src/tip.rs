//! The global chain tip: the single piece of mutable shared state in the
//! sequencer.
//!
//! `advance()` is the one indivisible step of acceptance: read the tip,
//! compute the event's hash from it, and swap the tip forward, all in a
//! compare-and-swap retry loop.  An event is never committed to the
//! observable tip without immediately owning the resulting hash, so no two
//! events can ever be assigned the same `prev_hash`.
//!
//! The tip is an `ArcSwap`, not a mutex: reads are wait-free and the
//! advance path is lock-free, so tip contention never becomes the
//! pipeline's throughput ceiling.

use std::sync::Arc;

use arc_swap::ArcSwap;

use custos_contracts::CustosResult;

/// The hashes assigned to one accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedHashes {
    /// The chain tip observed at acceptance, i.e. the event's `prev_hash`.
    pub prev_hash: String,
    /// The newly computed `entry_hash`, now the chain tip.
    pub entry_hash: String,
}

/// The atomically updated chain tip.
pub struct ChainTip {
    tip: ArcSwap<String>,
}

impl ChainTip {
    /// Create a tip seeded with the genesis sentinel (or a carry-over hash
    /// when resuming an existing chain).
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            tip: ArcSwap::from_pointee(initial.into()),
        }
    }

    /// Wait-free read of the current tip.
    pub fn current(&self) -> String {
        self.tip.load().as_str().to_owned()
    }

    /// Atomically advance the tip.
    ///
    /// `link` computes the candidate hash from the observed tip.  On CAS
    /// contention the loop re-observes and recomputes, so the returned pair
    /// is always consistent: `entry_hash = link(prev_hash)` and the tip
    /// moved from `prev_hash` to `entry_hash` in one step.
    ///
    /// # Errors
    ///
    /// Propagates the first error from `link`; the tip is left untouched
    /// in that case.
    pub fn advance<F>(&self, link: F) -> CustosResult<SequencedHashes>
    where
        F: Fn(&str) -> CustosResult<String>,
    {
        let mut observed = self.tip.load();
        loop {
            let candidate = Arc::new(link(observed.as_str())?);
            let witnessed = self.tip.compare_and_swap(&*observed, Arc::clone(&candidate));
            if Arc::ptr_eq(&*witnessed, &*observed) {
                return Ok(SequencedHashes {
                    prev_hash: observed.as_str().to_owned(),
                    entry_hash: candidate.as_str().to_owned(),
                });
            }
            // Lost the race: another producer advanced the tip first.
            observed = witnessed;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
