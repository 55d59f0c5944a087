//! Error types for the CUSTOS audit pipeline.
//!
//! All fallible operations return `CustosResult<T>`.  Producer-visible
//! failures are limited to rejection (`SigningFailed`, `HashingFailed`) and
//! the critical backpressure timeout (`HighRiskTimeout`); storage failures
//! and low-priority drops are absorbed into metrics and logs instead.

use thiserror::Error;

/// The unified error type for the CUSTOS crates.
#[derive(Debug, Error)]
pub enum CustosError {
    /// The chain hash for an event could not be computed.
    #[error("hashing failed: {reason}")]
    HashingFailed { reason: String },

    /// The signer could not attach a signature.
    ///
    /// Surfaced to the producer as a record failure.  The chain tip has
    /// already advanced by then; see the pipeline docs for the resulting
    /// chain-gap semantics.
    #[error("signing failed: {reason}")]
    SigningFailed { reason: String },

    /// A high-risk event could not be enqueued within its extended timeout.
    ///
    /// Dropping the event is not acceptable, so this is surfaced to the
    /// producer as a fatal condition.
    #[error("high-risk event not enqueued within {waited_ms}ms, refusing to drop")]
    HighRiskTimeout { waited_ms: u64 },

    /// The durable store rejected a batch.
    #[error("storage failed: {reason}")]
    StorageFailed { reason: String },

    /// The store was used after `close()`.
    #[error("store is closed")]
    StoreClosed,

    /// A verification join (sharded merge or async wait) did not complete
    /// within its timeout.
    #[error("verification join timed out after {waited_ms}ms")]
    ShardJoinTimeout { waited_ms: u64 },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

/// Convenience alias used throughout the CUSTOS crates.
pub type CustosResult<T> = Result<T, CustosError>;
