//! Core trait definitions for the CUSTOS audit pipeline.
//!
//! These traits define the pipeline's collaborator boundary:
//!
//! - `ChainLinker` — pure hash-chain arithmetic (no shared state)
//! - `Signer`      — signature creation, verification, key rotation
//! - `AuditStore`  — durable, batched, order-preserving persistence
//! - `MetricsSink` — counters/gauges and the overall health flag
//! - `MemoryGauge` — process memory pressure probe
//!
//! The ingestion pipeline and the verifier are written entirely against
//! these traits; swapping any implementation never touches the core logic.

use custos_contracts::{AuditEvent, CustosResult};

/// Deterministic hash-chain arithmetic.
///
/// Implementations must be pure: the same `(event content, prev_hash)` pair
/// always yields the same hash, regardless of the event's current chain
/// fields or signature.  The pipeline relies on this to recompute hashes
/// during verification years after ingestion.
pub trait ChainLinker: Send + Sync {
    /// Compute the chain hash for `event` as the successor of `prev_hash`.
    ///
    /// The event's own `prev_hash`/`entry_hash`/`signature` fields must NOT
    /// contribute to the result.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::HashingFailed` when the event cannot be
    /// canonicalized (malformed detail payloads).
    fn compute_hash(&self, event: &AuditEvent, prev_hash: &str) -> CustosResult<String>;

    /// Check that `event.entry_hash` matches a recomputation from the
    /// event's content, and that its stored `prev_hash` equals `prev_hash`.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::HashingFailed` for malformed entries; the
    /// verifier turns this into a failed result, never a propagated error.
    fn verify_entry(&self, event: &AuditEvent, prev_hash: &str) -> CustosResult<bool>;
}

/// Signature creation and verification with key rotation.
///
/// Signing is logically part of the accept operation: the pipeline calls
/// `sign()` immediately after sequencing, before the event becomes visible
/// to the flush path.
pub trait Signer: Send + Sync {
    /// Attach a signature over the event's canonical content plus
    /// `entry_hash`, using the currently active key.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::SigningFailed` when no usable key is available
    /// or the signing operation itself fails.
    fn sign(&self, event: &mut AuditEvent) -> CustosResult<()>;

    /// Verify the event's signature against any key this signer still
    /// considers valid (including rotated-away keys).  Returns `false` for
    /// unsigned events, unknown keys, and signature mismatches.
    fn verify(&self, event: &AuditEvent) -> bool;

    /// True when the active key has outlived its rotation policy.
    fn needs_rotation(&self) -> bool;

    /// Retire the active key (keeping it valid for verification) and
    /// activate a freshly generated one.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::SigningFailed` when a new key cannot be
    /// generated.
    fn rotate(&self) -> CustosResult<()>;
}

/// Durable, order-preserving batch persistence.
///
/// `batch_save` must preserve the order of `events` end-to-end: the chain's
/// prev-hash linkage is only meaningful if storage keeps the order the
/// chain was built in.
pub trait AuditStore: Send + Sync {
    /// Persist one ordered batch.  All-or-nothing from the caller's view:
    /// on error the flush scheduler re-queues the whole batch.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::StorageFailed` (or `StoreClosed`) on failure.
    fn batch_save(&self, events: &[AuditEvent]) -> CustosResult<()>;

    /// Flush and release underlying resources.  Saves after close fail.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::StorageFailed` when the final flush fails.
    fn close(&self) -> CustosResult<()>;
}

/// Counters/gauges for pipeline observability.
///
/// Implementations must be cheap and non-blocking; these are called on the
/// producer hot path.  Backpressure and drops are observable only through
/// this sink and the queue-status snapshot, never through producer errors.
pub trait MetricsSink: Send + Sync {
    /// A record() call succeeded, taking `elapsed_ms` end to end.
    fn record_success(&self, elapsed_ms: u64);

    /// A record() call failed; `kind` names the failure class
    /// (e.g. "sign", "queue-full").
    fn record_failure(&self, kind: &str);

    /// A high-risk event passed through the pipeline.
    fn record_critical(&self);

    /// A low-priority event was dropped under backpressure.
    fn record_drop(&self);

    /// A store batch write failed.
    fn record_storage_error(&self);

    /// A batch of `size` events was persisted in `elapsed_ms`.
    fn record_batch(&self, size: usize, elapsed_ms: u64);

    /// The queue occupancy changed.
    fn update_queue_size(&self, size: usize);

    /// Overall health verdict derived from the counters.
    fn is_healthy(&self) -> bool;
}

/// Process memory pressure probe.
///
/// `used_fraction` returns the fraction of the configured memory budget in
/// use, in `0.0..=1.0`.  The pipeline triggers an emergency flush before
/// enqueueing when this exceeds the configured threshold.
pub trait MemoryGauge: Send + Sync {
    /// Current memory use as a fraction of the budget; 0.0 when unknown.
    fn used_fraction(&self) -> f64;
}
