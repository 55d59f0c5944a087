//! Verification result and report types.
//!
//! Produced only by the verifier, never persisted, immutable once built.
//! A verification *failure* is a normal reportable finding, not an error;
//! these types are the data it is reported as.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The outcome of verifying a single entry against its expected predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// True when both the hash link and the signature checked out.
    pub valid: bool,
    /// Human-readable reason for a failed check, with the causing error
    /// attached when the failure was an internal one (malformed entry).
    pub error: Option<String>,
    /// The id of the entry this result refers to, when known.
    pub entry_id: Option<String>,
    /// Zero-based position of the entry within the verified sequence.
    /// Set by the chain walk, absent for standalone entry checks.
    pub entry_index: Option<usize>,
}

impl VerificationResult {
    /// A passing result for the given entry.
    pub fn pass(entry_id: impl Into<String>) -> Self {
        Self {
            valid: true,
            error: None,
            entry_id: Some(entry_id.into()),
            entry_index: None,
        }
    }

    /// A failing result with a reason.
    pub fn fail(entry_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            entry_id,
            entry_index: None,
        }
    }

    /// The same result pinned to a position in the verified sequence.
    pub fn at_index(mut self, index: usize) -> Self {
        self.entry_index = Some(index);
        self
    }
}

/// The merged outcome of verifying a sequence of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only when every entry passed.
    pub valid: bool,
    /// How many entries were checked.
    pub total_entries: usize,
    /// How many entries passed.
    pub success_count: usize,
    /// How many entries failed.
    pub error_count: usize,
    /// Wall-clock time spent verifying, in milliseconds.  For sharded runs
    /// this is the sum across shards, not the elapsed wall time.
    pub elapsed_ms: u64,
    /// Every failing entry, in sequence order, with its position index.
    pub failures: Vec<VerificationResult>,
    /// Optional annotation (e.g. "no entries to verify").
    pub note: Option<String>,
}

impl VerificationReport {
    /// A trivially valid report for an empty input.
    pub fn empty(note: impl Into<String>) -> Self {
        Self {
            valid: true,
            total_entries: 0,
            success_count: 0,
            error_count: 0,
            elapsed_ms: 0,
            failures: Vec::new(),
            note: Some(note.into()),
        }
    }
}

/// Cumulative verifier counters, readable across calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationStats {
    /// Entries checked since start or the last reset.
    pub total_verified_entries: u64,
    /// Failing entries since start or the last reset.
    pub total_verification_errors: u64,
    /// When the most recent verification finished, if any.
    pub last_verification: Option<DateTime<Utc>>,
    /// When the most recent fully-clean verification finished, if any.
    pub last_successful_verification: Option<DateTime<Utc>>,
}

impl VerificationStats {
    /// Fraction of checked entries that failed, 0.0 when nothing was checked.
    pub fn error_rate(&self) -> f64 {
        if self.total_verified_entries == 0 {
            0.0
        } else {
            self.total_verification_errors as f64 / self.total_verified_entries as f64
        }
    }
}
