//! The chain verifier: replay persisted entries and report every
//! divergence.
//!
//! Verification failures are findings, not errors: they come back as
//! `VerificationResult`/`VerificationReport` data so one bad entry can
//! never abort a bulk audit sweep.  Internal errors (malformed entries)
//! are converted into failed results with the cause attached.
//!
//! The sequential walk forwards each entry's *stored* hash as the next
//! expected `prev_hash`.  This keeps later entries judged against what was
//! actually persisted: a single tampered entry yields a failure at exactly
//! its own index instead of cascading artificial failures downstream.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{error, info, warn};

use custos_contracts::{
    AuditEvent, CustosError, CustosResult, VerificationReport, VerificationResult,
    VerificationStats,
};
use custos_core::config::VerifierConfig;
use custos_core::traits::{ChainLinker, Signer};

// ── Shared state ──────────────────────────────────────────────────────────────

struct VerifierShared {
    chain: Arc<dyn ChainLinker>,
    signer: Arc<dyn Signer>,
    config: VerifierConfig,

    total_verified: AtomicU64,
    total_errors: AtomicU64,
    last_verification: RwLock<Option<DateTime<Utc>>>,
    last_successful: RwLock<Option<DateTime<Utc>>>,

    in_flight: AtomicUsize,
    idle_gate: Mutex<()>,
    idle_signal: Condvar,
}

/// Keeps `in_flight` accurate across worker threads, including on panic.
struct InFlightGuard {
    shared: Arc<VerifierShared>,
}

impl InFlightGuard {
    fn acquire(shared: &Arc<VerifierShared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        let _gate = self.shared.idle_gate.lock();
        self.shared.idle_signal.notify_all();
    }
}

// ── Async job handle ──────────────────────────────────────────────────────────

/// Handle to a verification running on a background worker.
pub struct VerificationJob {
    receiver: mpsc::Receiver<VerificationReport>,
}

impl VerificationJob {
    /// Block until the verification finishes.
    ///
    /// If the worker terminated without producing a report, the returned
    /// report is marked invalid with an explanatory note; errors stay data.
    pub fn wait(self) -> VerificationReport {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Self::lost_worker_report())
    }

    /// Block up to `timeout` for the verification to finish.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ShardJoinTimeout` when the worker is still
    /// running at the deadline.
    pub fn wait_timeout(self, timeout: Duration) -> CustosResult<VerificationReport> {
        match self.receiver.recv_timeout(timeout) {
            Ok(report) => Ok(report),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CustosError::ShardJoinTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(Self::lost_worker_report()),
        }
    }

    fn lost_worker_report() -> VerificationReport {
        VerificationReport {
            valid: false,
            total_entries: 0,
            success_count: 0,
            error_count: 0,
            elapsed_ms: 0,
            failures: Vec::new(),
            note: Some("verification worker terminated without a report".to_string()),
        }
    }
}

// ── Verifier ──────────────────────────────────────────────────────────────────

/// Sequential and sharded verifier over persisted audit entries.
///
/// Cheap to clone; clones share the running counters and the in-flight
/// worker accounting.
#[derive(Clone)]
pub struct ChainVerifier {
    shared: Arc<VerifierShared>,
}

impl ChainVerifier {
    pub fn new(
        config: VerifierConfig,
        chain: Arc<dyn ChainLinker>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            shared: Arc::new(VerifierShared {
                chain,
                signer,
                config,
                total_verified: AtomicU64::new(0),
                total_errors: AtomicU64::new(0),
                last_verification: RwLock::new(None),
                last_successful: RwLock::new(None),
                in_flight: AtomicUsize::new(0),
                idle_gate: Mutex::new(()),
                idle_signal: Condvar::new(),
            }),
        }
    }

    // ── Single entry ─────────────────────────────────────────────────────────

    /// Check one entry against the chain hash it should follow, then its
    /// signature.  Updates the running counters for this single entry.
    pub fn verify_entry(&self, entry: &AuditEvent, expected_prev: &str) -> VerificationResult {
        let result = self.check_entry(entry, expected_prev);
        self.shared.total_verified.fetch_add(1, Ordering::Relaxed);
        if !result.valid {
            self.shared.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        *self.shared.last_verification.write() = Some(Utc::now());
        result
    }

    /// The raw check, shared by the single-entry and chain paths.  Never
    /// propagates an error: an internal failure becomes a failed result
    /// with the cause attached.
    fn check_entry(&self, entry: &AuditEvent, expected_prev: &str) -> VerificationResult {
        match self.shared.chain.verify_entry(entry, expected_prev) {
            Ok(true) => {}
            Ok(false) => {
                return VerificationResult::fail(
                    Some(entry.id.clone()),
                    "hash chain verification failed",
                );
            }
            Err(e) => {
                return VerificationResult::fail(
                    Some(entry.id.clone()),
                    format!("verification error: {e}"),
                );
            }
        }

        if !self.shared.signer.verify(entry) {
            return VerificationResult::fail(
                Some(entry.id.clone()),
                "signature verification failed",
            );
        }

        VerificationResult::pass(entry.id.clone())
    }

    // ── Sequential chain ─────────────────────────────────────────────────────

    /// Walk `entries` in order, threading each entry's stored `entry_hash`
    /// forward as the next expected `prev_hash`.
    ///
    /// `initial_prev` is the carry-in for the first entry: the genesis
    /// sentinel when verifying from the start of the chain, or the
    /// predecessor's hash when verifying a sub-range.  A failing entry does
    /// not stop the walk; the report lists every divergence with its index.
    pub fn verify_chain(&self, entries: &[AuditEvent], initial_prev: &str) -> VerificationReport {
        if entries.is_empty() {
            return VerificationReport::empty("no entries to verify");
        }

        let start = Instant::now();
        let mut failures = Vec::new();
        let mut expected_prev = initial_prev.to_string();

        for (index, entry) in entries.iter().enumerate() {
            let result = self.check_entry(entry, &expected_prev);
            if !result.valid {
                warn!(
                    index,
                    entry_id = %entry.id,
                    error = result.error.as_deref().unwrap_or(""),
                    "chain verification failure"
                );
                failures.push(result.at_index(index));
            }
            // Forward the stored hash, not a recomputed one.
            expected_prev.clone_from(&entry.entry_hash);
        }

        let error_count = failures.len();
        let report = VerificationReport {
            valid: error_count == 0,
            total_entries: entries.len(),
            success_count: entries.len() - error_count,
            error_count,
            elapsed_ms: start.elapsed().as_millis() as u64,
            failures,
            note: None,
        };

        self.record_outcome(&report);
        if report.valid {
            info!(
                total = report.total_entries,
                elapsed_ms = report.elapsed_ms,
                "chain verification passed"
            );
        } else {
            error!(
                errors = report.error_count,
                total = report.total_entries,
                elapsed_ms = report.elapsed_ms,
                "chain verification failed"
            );
        }
        report
    }

    /// Run `verify_chain` on a background worker.
    pub fn verify_chain_async(
        &self,
        entries: Vec<AuditEvent>,
        initial_prev: String,
    ) -> VerificationJob {
        let (sender, receiver) = mpsc::channel();
        let verifier = self.clone();
        let guard = InFlightGuard::acquire(&self.shared);
        thread::spawn(move || {
            let _guard = guard;
            let report = verifier.verify_chain(&entries, &initial_prev);
            // The receiver may have given up; that is its prerogative.
            let _ = sender.send(report);
        });
        VerificationJob { receiver }
    }

    // ── Sharded ──────────────────────────────────────────────────────────────

    /// Verify `entries` as `shard_count` contiguous shards in parallel and
    /// merge the per-shard reports.
    ///
    /// Each shard carries in its own first entry's stored `prev_hash`, so
    /// internal links are fully checked while the exact seam between
    /// consecutive shards is not re-asserted; callers needing whole-chain
    /// certainty should also run `verify_chain`.  Failure indices in the
    /// merged report are positions in `entries`, not shard-local.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ShardJoinTimeout` when the shards do not all
    /// finish within the configured merge-wait timeout.
    pub fn verify_sharded(
        &self,
        entries: &[AuditEvent],
        shard_count: usize,
    ) -> CustosResult<VerificationReport> {
        if entries.is_empty() {
            return Ok(VerificationReport::empty("no entries to verify"));
        }

        let shard_count = shard_count.clamp(1, entries.len());
        let shard_size = entries.len().div_ceil(shard_count);
        let (sender, receiver) = mpsc::channel();

        let mut spawned = 0usize;
        for shard_start in (0..entries.len()).step_by(shard_size) {
            let shard_end = (shard_start + shard_size).min(entries.len());
            let shard: Vec<AuditEvent> = entries[shard_start..shard_end].to_vec();
            let carry_in = shard[0].prev_hash.clone();

            let verifier = self.clone();
            let sender = sender.clone();
            let guard = InFlightGuard::acquire(&self.shared);
            thread::spawn(move || {
                let _guard = guard;
                let report = verifier.verify_chain(&shard, &carry_in);
                let _ = sender.send((shard_start, report));
            });
            spawned += 1;
        }
        drop(sender);

        // Bounded merge-wait across all shards.
        let timeout = self.shared.config.shard_timeout();
        let deadline = Instant::now() + timeout;
        let mut shard_reports = Vec::with_capacity(spawned);
        for _ in 0..spawned {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(indexed) => shard_reports.push(indexed),
                Err(_) => {
                    error!(
                        received = shard_reports.len(),
                        expected = spawned,
                        "sharded verification timed out waiting for shards"
                    );
                    return Err(CustosError::ShardJoinTimeout {
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }

        // Merge in shard order, lifting failure indices to global positions.
        shard_reports.sort_by_key(|(start, _)| *start);
        let mut merged = VerificationReport {
            valid: true,
            total_entries: 0,
            success_count: 0,
            error_count: 0,
            elapsed_ms: 0,
            failures: Vec::new(),
            note: None,
        };
        for (shard_start, report) in shard_reports {
            merged.total_entries += report.total_entries;
            merged.success_count += report.success_count;
            merged.error_count += report.error_count;
            merged.elapsed_ms += report.elapsed_ms;
            merged.failures.extend(report.failures.into_iter().map(|f| {
                let global = f.entry_index.map(|i| shard_start + i);
                VerificationResult {
                    entry_index: global,
                    ..f
                }
            }));
        }
        merged.valid = merged.error_count == 0;

        if merged.valid {
            info!(
                total = merged.total_entries,
                shards = spawned,
                elapsed_ms = merged.elapsed_ms,
                "sharded verification passed"
            );
        } else {
            error!(
                errors = merged.error_count,
                total = merged.total_entries,
                shards = spawned,
                "sharded verification failed"
            );
        }
        Ok(merged)
    }

    // ── Stats & lifecycle ────────────────────────────────────────────────────

    fn record_outcome(&self, report: &VerificationReport) {
        self.shared
            .total_verified
            .fetch_add(report.total_entries as u64, Ordering::Relaxed);
        self.shared
            .total_errors
            .fetch_add(report.error_count as u64, Ordering::Relaxed);
        let now = Utc::now();
        *self.shared.last_verification.write() = Some(now);
        if report.valid {
            *self.shared.last_successful.write() = Some(now);
        }
    }

    /// Snapshot of the cumulative counters.
    pub fn get_stats(&self) -> VerificationStats {
        VerificationStats {
            total_verified_entries: self.shared.total_verified.load(Ordering::Relaxed),
            total_verification_errors: self.shared.total_errors.load(Ordering::Relaxed),
            last_verification: *self.shared.last_verification.read(),
            last_successful_verification: *self.shared.last_successful.read(),
        }
    }

    /// Zero the cumulative counters.
    pub fn reset_stats(&self) {
        self.shared.total_verified.store(0, Ordering::Relaxed);
        self.shared.total_errors.store(0, Ordering::Relaxed);
        *self.shared.last_verification.write() = None;
        *self.shared.last_successful.write() = None;
        info!("verification stats reset");
    }

    /// Wait (bounded by the configured grace period) for in-flight
    /// verification workers to finish.  Workers still running afterwards
    /// are detached with a warning.
    pub fn shutdown(&self) {
        let deadline = Instant::now() + self.shared.config.shutdown_grace();
        let mut gate = self.shared.idle_gate.lock();
        while self.shared.in_flight.load(Ordering::Acquire) > 0 {
            if self
                .shared
                .idle_signal
                .wait_until(&mut gate, deadline)
                .timed_out()
            {
                let in_flight = self.shared.in_flight.load(Ordering::Acquire);
                if in_flight > 0 {
                    warn!(in_flight, "verification workers still running at shutdown");
                    return;
                }
            }
        }
        info!("verifier shut down");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
