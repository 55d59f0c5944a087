//! # custos-ingest
//!
//! The ingestion core of the CUSTOS audit pipeline: the bounded queue, the
//! lock-free chain sequencer, the backpressure policy, and the flush
//! scheduler.
//!
//! ## Overview
//!
//! Producer threads call [`AuditPipeline::record`] concurrently.  Each call
//! atomically advances the global chain tip (assigning `prev_hash` and
//! `entry_hash` exactly once), signs the event, and enqueues it into a
//! bounded FIFO buffer under a priority-aware backpressure policy: high-risk
//! events block rather than drop, low-risk events degrade to a counted drop
//! when the queue is genuinely full.  A background scheduler drains batches
//! into the durable store and recovers by re-queueing on storage failure.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use custos_core::PipelineConfig;
//! use custos_crypto::{Ed25519Signer, Sha256ChainLinker};
//! use custos_ingest::{AtomicMetrics, AuditPipeline, NoMemoryGauge};
//! use custos_store::JsonlAuditStore;
//!
//! let pipeline = AuditPipeline::new(
//!     PipelineConfig::default(),
//!     Arc::new(Sha256ChainLinker::new()),
//!     Arc::new(Ed25519Signer::new()),
//!     Arc::new(JsonlAuditStore::open("audit.jsonl")?),
//!     Arc::new(AtomicMetrics::new()),
//!     Arc::new(NoMemoryGauge),
//! )?;
//!
//! pipeline.record(event)?;
//! pipeline.shutdown();
//! ```

pub mod metrics;
pub mod pipeline;
pub mod pressure;
pub mod queue;
pub mod tip;

pub use metrics::AtomicMetrics;
pub use pipeline::AuditPipeline;
pub use pressure::{FixedMemoryGauge, NoMemoryGauge, ProcRssGauge};
pub use queue::BoundedQueue;
pub use tip::{ChainTip, SequencedHashes};
