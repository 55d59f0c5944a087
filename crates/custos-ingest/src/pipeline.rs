//! The ingestion pipeline: chain sequencing, backpressure, and flush
//! scheduling.
//!
//! `record()` is safe for unbounded concurrent callers.  Acceptance is the
//! sequence: CAS the chain tip (assigning `prev_hash`/`entry_hash` exactly
//! once), sign, then enqueue under the backpressure policy.  A background
//! scheduler drains the queue into batches for the durable store and also
//! runs the key-rotation and health checks.
//!
//! Producer-visible errors are limited to sequencing/signing failures and
//! the high-risk enqueue timeout.  Everything else (storage failures,
//! low-priority drops) is absorbed into metrics and logs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use custos_contracts::{AuditEvent, CustosError, CustosResult, QueueStatus};
use custos_core::config::PipelineConfig;
use custos_core::traits::{AuditStore, ChainLinker, MemoryGauge, MetricsSink, Signer};

use crate::queue::BoundedQueue;
use crate::tip::ChainTip;

/// What the backpressure policy decided for one event.
enum EnqueueOutcome {
    Accepted,
    Dropped,
    TimedOut(CustosError),
}

struct PipelineInner {
    config: PipelineConfig,
    chain: Arc<dyn ChainLinker>,
    signer: Arc<dyn Signer>,
    store: Arc<dyn AuditStore>,
    metrics: Arc<dyn MetricsSink>,
    memory: Arc<dyn MemoryGauge>,
    queue: BoundedQueue<AuditEvent>,
    tip: ChainTip,
    total_accepted: AtomicU64,
    dropped_entries: AtomicU64,
    shutting_down: AtomicBool,
    scheduler_gate: Mutex<()>,
    scheduler_wakeup: Condvar,
}

impl PipelineInner {
    // ── Record path ───────────────────────────────────────────────────────────

    fn record(&self, mut event: AuditEvent) -> CustosResult<()> {
        let start = Instant::now();
        let high_risk = event.event_type.is_high_risk();

        // Sequencing: one indivisible tip advance per event.  The closure
        // recomputes the hash whenever the CAS loses a race, so the pair it
        // returns is always consistent with the tip it was installed over.
        let sequenced = match self.tip.advance(|prev| self.chain.compute_hash(&event, prev)) {
            Ok(sequenced) => sequenced,
            Err(e) => {
                self.metrics.record_failure("hash");
                error!(event_id = %event.id, error = %e, "hashing failed, event rejected");
                return Err(e);
            }
        };
        event.prev_hash = sequenced.prev_hash;
        event.entry_hash = sequenced.entry_hash;

        // Signing is part of accept.  A failure here surfaces to the caller;
        // the tip is NOT rolled back, so the chain keeps a gap at this slot
        // that verification will report at the seam.
        if let Err(e) = self.signer.sign(&mut event) {
            self.metrics.record_failure("sign");
            error!(event_id = %event.id, error = %e, "signing failed, event rejected");
            return Err(e);
        }

        if high_risk {
            self.metrics.record_critical();
        }

        let event_id = event.id.clone();
        match self.enqueue_with_backpressure(event, high_risk) {
            EnqueueOutcome::Accepted => {
                self.total_accepted.fetch_add(1, Ordering::Relaxed);
                let occupancy = self.queue.len();
                self.metrics.update_queue_size(occupancy);
                self.metrics
                    .record_success(start.elapsed().as_millis() as u64);
                debug!(event_id = %event_id, occupancy, "audit event enqueued");

                // Risky events must not sit in the queue behind a slow timer.
                if high_risk && occupancy >= self.config.high_risk_flush_threshold {
                    self.flush();
                }
                Ok(())
            }
            // Counted and reported via metrics inside the policy; the
            // producer never sees a drop as an error.
            EnqueueOutcome::Dropped => Ok(()),
            EnqueueOutcome::TimedOut(e) => Err(e),
        }
    }

    /// The ordered backpressure policy:
    ///
    /// 1. memory pressure first: emergency flush to make room;
    /// 2. below the high-water mark, a bounded blocking offer;
    /// 3. overflow: emergency flush + non-blocking offer, then either the
    ///    extended high-risk wait (surfacing a timeout as fatal) or a
    ///    counted low-priority drop.
    fn enqueue_with_backpressure(&self, event: AuditEvent, high_risk: bool) -> EnqueueOutcome {
        let used = self.memory.used_fraction();
        if used >= self.config.memory_pressure_threshold {
            warn!(used_fraction = used, "memory pressure, emergency flush before enqueue");
            self.flush();
        }

        let mut event = event;
        if self.queue.len() < self.config.high_water_mark() {
            match self.queue.offer(event, self.config.enqueue_timeout()) {
                Ok(()) => return EnqueueOutcome::Accepted,
                Err(back) => event = back,
            }
        }

        // Queue overflow: make room once, then try without blocking.
        self.flush();
        match self.queue.try_offer(event) {
            Ok(()) => return EnqueueOutcome::Accepted,
            Err(back) => event = back,
        }

        if high_risk {
            let timeout = self.config.high_risk_timeout();
            let event_id = event.id.clone();
            match self.queue.offer(event, timeout) {
                Ok(()) => EnqueueOutcome::Accepted,
                Err(_) => {
                    let waited_ms = timeout.as_millis() as u64;
                    self.metrics.record_failure("high-risk-queue-full");
                    error!(
                        event_id = %event_id,
                        waited_ms,
                        "high-risk event could not be enqueued, refusing to drop"
                    );
                    EnqueueOutcome::TimedOut(CustosError::HighRiskTimeout { waited_ms })
                }
            }
        } else {
            self.note_drop(&event.id);
            EnqueueOutcome::Dropped
        }
    }

    fn note_drop(&self, event_id: &str) {
        self.dropped_entries.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_drop();
        self.metrics.update_queue_size(self.queue.len());
        debug!(event_id = %event_id, "low-priority audit event dropped under backpressure");
    }

    // ── Flush path ────────────────────────────────────────────────────────────

    /// Drain up to one batch and hand it to the store.  Returns the number
    /// of events persisted (0 when the queue was empty or the save failed).
    ///
    /// Storage failures are absorbed: the batch is re-offered to the queue
    /// under the normal backpressure policy and the failure is recorded as
    /// a metric, never raised to a producer.
    fn flush(&self) -> usize {
        let batch = self.queue.drain(self.config.batch_size);
        self.metrics.update_queue_size(self.queue.len());
        if batch.is_empty() {
            return 0;
        }

        let start = Instant::now();
        match self.store.batch_save(&batch) {
            Ok(()) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                self.metrics.record_batch(batch.len(), elapsed_ms);
                info!(count = batch.len(), elapsed_ms, "audit batch flushed");
                batch.len()
            }
            Err(e) => {
                error!(count = batch.len(), error = %e, "audit batch flush failed, re-queueing");
                self.metrics.record_storage_error();
                self.requeue_failed_batch(batch);
                0
            }
        }
    }

    /// Best-effort re-offer of a failed batch, in batch order.  Does not
    /// bypass backpressure: low-priority events may drop (counted), while
    /// high-risk events get the extended wait and are logged as critical
    /// failures if the queue stays full past it.
    fn requeue_failed_batch(&self, batch: Vec<AuditEvent>) {
        for event in batch {
            let high_risk = event.event_type.is_high_risk();
            let event = match self.queue.try_offer(event) {
                Ok(()) => continue,
                Err(back) => back,
            };
            if high_risk {
                let event_id = event.id.clone();
                if self
                    .queue
                    .offer(event, self.config.high_risk_timeout())
                    .is_err()
                {
                    self.metrics.record_failure("requeue-high-risk");
                    error!(
                        event_id = %event_id,
                        "high-risk event from failed batch lost: queue full past timeout"
                    );
                }
            } else {
                self.note_drop(&event.id);
            }
        }
        self.metrics.update_queue_size(self.queue.len());
    }

    // ── Scheduled duties ──────────────────────────────────────────────────────

    fn scheduled_flush(&self) {
        if !self.shutting_down.load(Ordering::Acquire) {
            self.flush();
        }
    }

    fn check_key_rotation(&self) {
        if self.signer.needs_rotation() {
            info!("signing key rotation due");
            match self.signer.rotate() {
                Ok(()) => info!("signing key rotation complete"),
                Err(e) => error!(error = %e, "signing key rotation failed"),
            }
        }
    }

    fn health_check(&self) {
        let status = self.queue_status();
        if !self.metrics.is_healthy() {
            warn!(status = %status, "audit pipeline health check failed");
        }
        if status.percent_full > 90 {
            warn!(percent_full = status.percent_full, "audit queue nearly full");
        }
    }

    fn queue_status(&self) -> QueueStatus {
        let current_size = self.queue.len();
        let capacity = self.queue.capacity();
        QueueStatus {
            current_size,
            capacity,
            percent_full: ((current_size * 100) / capacity) as u8,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            dropped_entries: self.dropped_entries.load(Ordering::Relaxed),
            last_hash: self.tip.current(),
            needs_flush: current_size >= (self.config.batch_size / 2).max(1),
        }
    }
}

/// The scheduler thread: a condvar-timed loop so shutdown wakes it
/// immediately instead of waiting out the flush interval.
fn scheduler_loop(inner: Arc<PipelineInner>) {
    let mut last_rotation_check = Instant::now();
    let mut last_health_check = Instant::now();

    loop {
        {
            // The flag is checked under the gate so a shutdown signalled
            // before this thread reaches the wait cannot be lost.
            let mut gate = inner.scheduler_gate.lock();
            if inner.shutting_down.load(Ordering::Acquire) {
                break;
            }
            let deadline = Instant::now() + inner.config.flush_interval();
            let _ = inner.scheduler_wakeup.wait_until(&mut gate, deadline);
        }
        if inner.shutting_down.load(Ordering::Acquire) {
            break;
        }

        inner.scheduled_flush();

        if last_rotation_check.elapsed() >= inner.config.rotation_check_interval() {
            inner.check_key_rotation();
            last_rotation_check = Instant::now();
        }
        if last_health_check.elapsed() >= inner.config.health_check_interval() {
            inner.health_check();
            last_health_check = Instant::now();
        }
    }
    debug!("audit scheduler stopped");
}

/// The ingestion queue, chain sequencer, and flush scheduler.
///
/// Cheap to share: clone the `Arc` it usually lives in, or hand out
/// references.  All methods take `&self` and are safe for concurrent use.
pub struct AuditPipeline {
    inner: Arc<PipelineInner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl AuditPipeline {
    /// Build a pipeline whose chain starts at the genesis sentinel.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ConfigError` for an invalid config or when the
    /// scheduler thread cannot be spawned.
    pub fn new(
        config: PipelineConfig,
        chain: Arc<dyn ChainLinker>,
        signer: Arc<dyn Signer>,
        store: Arc<dyn AuditStore>,
        metrics: Arc<dyn MetricsSink>,
        memory: Arc<dyn MemoryGauge>,
    ) -> CustosResult<Self> {
        Self::with_initial_tip(
            config,
            chain,
            signer,
            store,
            metrics,
            memory,
            AuditEvent::GENESIS_HASH,
        )
    }

    /// Build a pipeline resuming an existing chain: `initial_tip` is the
    /// `entry_hash` of the last previously persisted event.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ConfigError` for an invalid config or when the
    /// scheduler thread cannot be spawned.
    #[allow(clippy::too_many_arguments)]
    pub fn with_initial_tip(
        config: PipelineConfig,
        chain: Arc<dyn ChainLinker>,
        signer: Arc<dyn Signer>,
        store: Arc<dyn AuditStore>,
        metrics: Arc<dyn MetricsSink>,
        memory: Arc<dyn MemoryGauge>,
        initial_tip: impl Into<String>,
    ) -> CustosResult<Self> {
        config.validate()?;

        let inner = Arc::new(PipelineInner {
            queue: BoundedQueue::new(config.queue_capacity),
            tip: ChainTip::new(initial_tip),
            config,
            chain,
            signer,
            store,
            metrics,
            memory,
            total_accepted: AtomicU64::new(0),
            dropped_entries: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            scheduler_gate: Mutex::new(()),
            scheduler_wakeup: Condvar::new(),
        });

        let scheduler = thread::Builder::new()
            .name("custos-scheduler".to_string())
            .spawn({
                let inner = Arc::clone(&inner);
                move || scheduler_loop(inner)
            })
            .map_err(|e| CustosError::ConfigError {
                reason: format!("cannot spawn scheduler thread: {e}"),
            })?;

        info!(
            queue_capacity = inner.config.queue_capacity,
            batch_size = inner.config.batch_size,
            flush_interval_ms = inner.config.flush_interval_ms,
            "audit pipeline started"
        );

        Ok(Self {
            inner,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Accept one event: sequence it into the hash chain, sign it, and
    /// enqueue it for flushing.
    ///
    /// On success the event's hash is committed to the in-memory chain tip
    /// for all subsequent callers (durable storage follows asynchronously).
    /// A low-priority event silently dropped under backpressure still
    /// returns `Ok(())`; the drop is visible in the queue status and
    /// metrics instead.
    ///
    /// # Errors
    ///
    /// `CustosError::HashingFailed` / `SigningFailed` when the event cannot
    /// be accepted at all, and `CustosError::HighRiskTimeout` when a
    /// high-risk event cannot be enqueued within the extended timeout.
    pub fn record(&self, event: AuditEvent) -> CustosResult<()> {
        self.inner.record(event)
    }

    /// Record a batch of events in order, stopping at the first hard
    /// failure.  Returns how many events were accepted; events accepted
    /// before a failure stay accepted.
    ///
    /// # Errors
    ///
    /// The first error `record()` surfaces, if any.
    pub fn record_batch(&self, events: Vec<AuditEvent>) -> CustosResult<usize> {
        let mut accepted = 0usize;
        for event in events {
            self.record(event)?;
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Manually drain up to one batch into the store.  Returns the number
    /// of events persisted; storage failures are absorbed (see `flush`
    /// internals) and report 0.
    pub fn flush(&self) -> usize {
        self.inner.flush()
    }

    /// A fresh snapshot of the queue and chain state.
    pub fn get_queue_status(&self) -> QueueStatus {
        self.inner.queue_status()
    }

    /// Cumulative count of low-priority events dropped under backpressure.
    pub fn get_dropped_entries(&self) -> u64 {
        self.inner.dropped_entries.load(Ordering::Relaxed)
    }

    /// The current chain tip hash.
    pub fn chain_tip(&self) -> String {
        self.inner.tip.current()
    }

    /// Destructive ops/debug operation: discard every queued event and
    /// reset the queue-size gauge.  The chain tip is untouched.
    pub fn clear_queue(&self) {
        let removed = self.inner.queue.clear();
        self.inner.metrics.update_queue_size(0);
        info!(removed, "audit queue cleared");
    }

    /// Run the key-rotation duty now (also runs on the scheduler's timer).
    pub fn check_key_rotation(&self) {
        self.inner.check_key_rotation();
    }

    /// Run the health-check duty now (also runs on the scheduler's timer).
    pub fn health_check(&self) {
        self.inner.health_check();
    }

    /// Stop the scheduler, flush everything still queued, and close the
    /// store.  Idempotent; the scheduler is given the configured grace
    /// period and detached with a warning if it fails to stop in time.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("audit pipeline shutting down");
        {
            let _gate = self.inner.scheduler_gate.lock();
            self.inner.scheduler_wakeup.notify_all();
        }

        if let Some(handle) = self.scheduler.lock().take() {
            let deadline = Instant::now() + self.inner.config.shutdown_grace();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("scheduler did not stop within the grace period, detaching");
            }
        }

        // Final drain: keep flushing full batches until the queue is empty
        // or a storage failure stops progress.
        while self.inner.flush() > 0 {}
        let remaining = self.inner.queue.len();
        if remaining > 0 {
            warn!(remaining, "events still queued at shutdown");
        }

        if let Err(e) = self.inner.store.close() {
            error!(error = %e, "closing audit store failed");
        }
        info!(
            total_accepted = self.inner.total_accepted.load(Ordering::Relaxed),
            dropped = self.inner.dropped_entries.load(Ordering::Relaxed),
            "audit pipeline shut down"
        );
    }
}

impl Drop for AuditPipeline {
    fn drop(&mut self) {
        // Idempotent; a no-op when shutdown() already ran.
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::AtomicBool;

    use custos_contracts::{AuditEventType, AuditOutcome, ClientInfo};
    use custos_crypto::{Ed25519Signer, Sha256ChainLinker};
    use custos_store::InMemoryAuditStore;

    use crate::metrics::AtomicMetrics;
    use crate::pressure::{FixedMemoryGauge, NoMemoryGauge};

    use super::*;

    // ── Helpers & mocks ──────────────────────────────────────────────────────

    /// A config that keeps the scheduler quiet so tests drive flushes
    /// deterministically.
    fn quiet_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.flush_interval_ms = 3_600_000;
        config.rotation_check_interval_ms = 3_600_000;
        config.health_check_interval_ms = 3_600_000;
        config.enqueue_timeout_ms = 50;
        config.high_risk_timeout_ms = 100;
        config.shutdown_grace_ms = 2_000;
        config
    }

    fn make_pipeline(
        config: PipelineConfig,
        store: Arc<dyn AuditStore>,
    ) -> (AuditPipeline, Arc<AtomicMetrics>) {
        let metrics = Arc::new(AtomicMetrics::new());
        let pipeline = AuditPipeline::new(
            config,
            Arc::new(Sha256ChainLinker::new()),
            Arc::new(Ed25519Signer::new()),
            store,
            metrics.clone(),
            Arc::new(NoMemoryGauge),
        )
        .unwrap();
        (pipeline, metrics)
    }

    fn low_risk_event(actor: &str) -> AuditEvent {
        AuditEvent::new(
            actor,
            AuditEventType::ApiAccess,
            "/api/data",
            AuditOutcome::Success,
            ClientInfo::none(),
            BTreeMap::new(),
        )
    }

    fn high_risk_event(actor: &str) -> AuditEvent {
        AuditEvent::new(
            actor,
            AuditEventType::Delete,
            "/api/records/1",
            AuditOutcome::Success,
            ClientInfo::none(),
            BTreeMap::new(),
        )
    }

    /// A store that fails while its switch is on.
    struct FlakyStore {
        failing: AtomicBool,
        inner: InMemoryAuditStore,
    }

    impl FlakyStore {
        fn failing() -> Self {
            Self {
                failing: AtomicBool::new(true),
                inner: InMemoryAuditStore::new(),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::Release);
        }
    }

    impl AuditStore for FlakyStore {
        fn batch_save(&self, events: &[AuditEvent]) -> CustosResult<()> {
            if self.failing.load(Ordering::Acquire) {
                return Err(CustosError::StorageFailed {
                    reason: "injected failure".to_string(),
                });
            }
            self.inner.batch_save(events)
        }

        fn close(&self) -> CustosResult<()> {
            self.inner.close()
        }
    }

    /// A signer that always refuses.
    struct RefusingSigner;

    impl Signer for RefusingSigner {
        fn sign(&self, _event: &mut AuditEvent) -> CustosResult<()> {
            Err(CustosError::SigningFailed {
                reason: "no usable key".to_string(),
            })
        }

        fn verify(&self, _event: &AuditEvent) -> bool {
            false
        }

        fn needs_rotation(&self) -> bool {
            false
        }

        fn rotate(&self) -> CustosResult<()> {
            Ok(())
        }
    }

    // ── Sequencing ───────────────────────────────────────────────────────────

    #[test]
    fn sequential_records_chain_from_genesis() {
        let store = Arc::new(InMemoryAuditStore::new());
        let (pipeline, _) = make_pipeline(quiet_config(), store.clone());

        pipeline.record(low_risk_event("alice")).unwrap();
        pipeline.record(low_risk_event("bob")).unwrap();
        assert_eq!(pipeline.flush(), 2);

        let saved = store.export();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].prev_hash, AuditEvent::GENESIS_HASH);
        assert_eq!(saved[1].prev_hash, saved[0].entry_hash);
        assert_eq!(pipeline.chain_tip(), saved[1].entry_hash);
        assert!(saved.iter().all(|e| e.signature.is_some()));

        pipeline.shutdown();
    }

    /// One hash per event, globally ordered, no duplicates, even when many
    /// producers race on the tip.
    #[test]
    fn concurrent_records_form_complete_chain() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 25;

        let store = Arc::new(InMemoryAuditStore::new());
        let (pipeline, _) = make_pipeline(quiet_config(), store.clone());
        let pipeline = Arc::new(pipeline);

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        pipeline
                            .record(low_risk_event(&format!("user-{t}-{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        while pipeline.flush() > 0 {}

        let saved = store.export();
        assert_eq!(saved.len(), THREADS * PER_THREAD);

        // Rebuild the chain by following prev -> entry links from genesis;
        // it must thread through every persisted event exactly once.
        let by_prev: HashMap<&str, &AuditEvent> = saved
            .iter()
            .map(|e| (e.prev_hash.as_str(), e))
            .collect();
        assert_eq!(by_prev.len(), saved.len(), "duplicate prev_hash assigned");

        let mut cursor = AuditEvent::GENESIS_HASH;
        let mut walked = 0usize;
        while let Some(event) = by_prev.get(cursor) {
            cursor = event.entry_hash.as_str();
            walked += 1;
        }
        assert_eq!(walked, saved.len(), "chain does not thread every event");
        assert_eq!(cursor, pipeline.chain_tip());

        pipeline.shutdown();
    }

    #[test]
    fn signing_failure_rejects_event_but_advances_tip() {
        let store = Arc::new(InMemoryAuditStore::new());
        let metrics = Arc::new(AtomicMetrics::new());
        let pipeline = AuditPipeline::new(
            quiet_config(),
            Arc::new(Sha256ChainLinker::new()),
            Arc::new(RefusingSigner),
            store.clone(),
            metrics.clone(),
            Arc::new(NoMemoryGauge),
        )
        .unwrap();

        let err = pipeline.record(low_risk_event("alice")).unwrap_err();
        assert!(matches!(err, CustosError::SigningFailed { .. }));

        // The tip moved (documented chain-gap semantics), but nothing was
        // accepted into the queue.
        assert_ne!(pipeline.chain_tip(), AuditEvent::GENESIS_HASH);
        assert_eq!(pipeline.get_queue_status().current_size, 0);
        assert_eq!(pipeline.get_queue_status().total_accepted, 0);
        assert_eq!(metrics.failure_events(), 1);

        pipeline.shutdown();
    }

    // ── Backpressure ─────────────────────────────────────────────────────────

    fn tiny_queue_config() -> PipelineConfig {
        let mut config = quiet_config();
        config.queue_capacity = 2;
        config.batch_size = 10;
        config.enqueue_timeout_ms = 20;
        config.high_risk_timeout_ms = 50;
        config
    }

    #[test]
    fn low_risk_overflow_drops_and_counts() {
        let store = Arc::new(FlakyStore::failing());
        let (pipeline, metrics) = make_pipeline(tiny_queue_config(), store.clone());

        // Fill the queue; the store rejects every flush attempt.
        pipeline.record(low_risk_event("a")).unwrap();
        pipeline.record(low_risk_event("b")).unwrap();
        assert_eq!(pipeline.get_queue_status().current_size, 2);

        // The third low-risk event cannot fit and must drop, silently.
        pipeline.record(low_risk_event("c")).unwrap();

        assert_eq!(pipeline.get_dropped_entries(), 1);
        assert_eq!(metrics.dropped_events(), 1);
        let status = pipeline.get_queue_status();
        assert_eq!(status.current_size, 2);
        assert_eq!(status.total_accepted, 2);

        // Dropping is monotonic.
        pipeline.record(low_risk_event("d")).unwrap();
        assert_eq!(pipeline.get_dropped_entries(), 2);

        store.set_failing(false);
        pipeline.shutdown();
    }

    #[test]
    fn high_risk_overflow_times_out_instead_of_dropping() {
        let store = Arc::new(FlakyStore::failing());
        let (pipeline, _) = make_pipeline(tiny_queue_config(), store.clone());

        pipeline.record(low_risk_event("a")).unwrap();
        pipeline.record(low_risk_event("b")).unwrap();

        let err = pipeline.record(high_risk_event("c")).unwrap_err();
        assert!(matches!(err, CustosError::HighRiskTimeout { .. }));

        // High-risk events never show up in the dropped count.
        assert_eq!(pipeline.get_dropped_entries(), 0);

        store.set_failing(false);
        pipeline.shutdown();
    }

    #[test]
    fn no_drop_below_high_water_mark() {
        let store = Arc::new(InMemoryAuditStore::new());
        let mut config = quiet_config();
        config.queue_capacity = 100;
        let (pipeline, _) = make_pipeline(config, store);

        for i in 0..50 {
            pipeline.record(low_risk_event(&format!("u{i}"))).unwrap();
        }
        assert_eq!(pipeline.get_dropped_entries(), 0);

        pipeline.shutdown();
    }

    #[test]
    fn high_risk_event_triggers_immediate_flush() {
        let store = Arc::new(InMemoryAuditStore::new());
        let mut config = quiet_config();
        config.high_risk_flush_threshold = 3;
        let (pipeline, _) = make_pipeline(config, store.clone());

        pipeline.record(low_risk_event("a")).unwrap();
        pipeline.record(low_risk_event("b")).unwrap();
        pipeline.record(low_risk_event("c")).unwrap();
        assert!(store.is_empty(), "no flush expected for low-risk events");

        pipeline.record(high_risk_event("d")).unwrap();
        assert_eq!(store.len(), 4, "risky event must not sit in the queue");
        assert_eq!(pipeline.get_queue_status().current_size, 0);

        pipeline.shutdown();
    }

    #[test]
    fn memory_pressure_flushes_before_enqueue() {
        let store = Arc::new(InMemoryAuditStore::new());
        let metrics = Arc::new(AtomicMetrics::new());
        let pipeline = AuditPipeline::new(
            quiet_config(),
            Arc::new(Sha256ChainLinker::new()),
            Arc::new(Ed25519Signer::new()),
            store.clone(),
            metrics,
            Arc::new(FixedMemoryGauge(0.95)),
        )
        .unwrap();

        pipeline.record(low_risk_event("a")).unwrap();
        // Recording under pressure flushes the queued event first.
        pipeline.record(low_risk_event("b")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(pipeline.get_queue_status().current_size, 1);

        pipeline.shutdown();
    }

    // ── Flush & recovery ─────────────────────────────────────────────────────

    #[test]
    fn flush_failure_requeues_batch_in_order() {
        let store = Arc::new(FlakyStore::failing());
        let mut config = quiet_config();
        config.queue_capacity = 10;
        let (pipeline, metrics) = make_pipeline(config, store.clone());

        for actor in ["a", "b", "c"] {
            pipeline.record(low_risk_event(actor)).unwrap();
        }

        assert_eq!(pipeline.flush(), 0);
        assert_eq!(metrics.storage_errors(), 1);
        assert!(store.inner.is_empty());
        assert_eq!(pipeline.get_queue_status().current_size, 3);
        assert_eq!(pipeline.get_dropped_entries(), 0);

        store.set_failing(false);
        assert_eq!(pipeline.flush(), 3);
        let actors: Vec<String> = store.inner.export().into_iter().map(|e| e.actor).collect();
        assert_eq!(actors, vec!["a", "b", "c"]);

        pipeline.shutdown();
    }

    #[test]
    fn flush_drains_at_most_one_batch() {
        let store = Arc::new(InMemoryAuditStore::new());
        let mut config = quiet_config();
        config.batch_size = 2;
        let (pipeline, _) = make_pipeline(config, store.clone());

        for i in 0..5 {
            pipeline.record(low_risk_event(&format!("u{i}"))).unwrap();
        }

        assert_eq!(pipeline.flush(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(pipeline.get_queue_status().current_size, 3);

        pipeline.shutdown();
    }

    // ── Status, clear, batch record ──────────────────────────────────────────

    #[test]
    fn queue_status_reflects_live_counters() {
        let store = Arc::new(InMemoryAuditStore::new());
        let mut config = quiet_config();
        config.batch_size = 4;
        let (pipeline, _) = make_pipeline(config, store);

        let empty = pipeline.get_queue_status();
        assert_eq!(empty.current_size, 0);
        assert!(!empty.needs_flush);
        assert_eq!(empty.last_hash, AuditEvent::GENESIS_HASH);

        pipeline.record(low_risk_event("a")).unwrap();
        pipeline.record(low_risk_event("b")).unwrap();

        let status = pipeline.get_queue_status();
        assert_eq!(status.current_size, 2);
        assert_eq!(status.total_accepted, 2);
        assert!(status.needs_flush, "2 pending >= batch_size/2");
        assert_eq!(status.last_hash, pipeline.chain_tip());

        pipeline.shutdown();
    }

    #[test]
    fn clear_queue_discards_pending_events() {
        let store = Arc::new(InMemoryAuditStore::new());
        let (pipeline, metrics) = make_pipeline(quiet_config(), store.clone());

        pipeline.record(low_risk_event("a")).unwrap();
        pipeline.record(low_risk_event("b")).unwrap();
        pipeline.clear_queue();

        assert_eq!(pipeline.get_queue_status().current_size, 0);
        assert_eq!(metrics.current_queue_size(), 0);
        assert_eq!(pipeline.flush(), 0);
        assert!(store.is_empty());

        pipeline.shutdown();
    }

    #[test]
    fn record_batch_accepts_all_events() {
        let store = Arc::new(InMemoryAuditStore::new());
        let (pipeline, _) = make_pipeline(quiet_config(), store.clone());

        let accepted = pipeline
            .record_batch(vec![
                low_risk_event("a"),
                high_risk_event("b"),
                low_risk_event("c"),
            ])
            .unwrap();
        assert_eq!(accepted, 3);
        while pipeline.flush() > 0 {}
        assert_eq!(store.len(), 3);

        pipeline.shutdown();
    }

    // ── Scheduler & lifecycle ────────────────────────────────────────────────

    #[test]
    fn scheduled_flush_drains_without_manual_calls() {
        let store = Arc::new(InMemoryAuditStore::new());
        let mut config = quiet_config();
        config.flush_interval_ms = 20;
        let (pipeline, _) = make_pipeline(config, store.clone());

        pipeline.record(low_risk_event("a")).unwrap();
        pipeline.record(low_risk_event("b")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.len(), 2);

        pipeline.shutdown();
    }

    #[test]
    fn rotation_duty_rotates_overdue_key() {
        let store = Arc::new(InMemoryAuditStore::new());
        let signer = Arc::new(Ed25519Signer::with_max_key_age(chrono::Duration::zero()));
        let pipeline = AuditPipeline::new(
            quiet_config(),
            Arc::new(Sha256ChainLinker::new()),
            signer.clone(),
            store,
            Arc::new(AtomicMetrics::new()),
            Arc::new(NoMemoryGauge),
        )
        .unwrap();

        let before = signer.active_key_id();
        pipeline.check_key_rotation();
        assert_ne!(signer.active_key_id(), before);

        // The health duty must not panic regardless of state.
        pipeline.health_check();

        pipeline.shutdown();
    }

    #[test]
    fn shutdown_flushes_remaining_events_and_closes_store() {
        let store = Arc::new(InMemoryAuditStore::new());
        let (pipeline, _) = make_pipeline(quiet_config(), store.clone());

        for i in 0..3 {
            pipeline.record(low_risk_event(&format!("u{i}"))).unwrap();
        }
        pipeline.shutdown();

        assert_eq!(store.len(), 3);
        assert!(store.is_closed());

        // Idempotent.
        pipeline.shutdown();
        assert_eq!(store.len(), 3);
    }
}
