//! # custos-core
//!
//! Trait seams and configuration for the CUSTOS audit pipeline.
//!
//! The pipeline core (`custos-ingest`, `custos-verify`) is written entirely
//! against the traits defined here; the crypto and storage crates provide
//! the default implementations.

pub mod config;
pub mod traits;

pub use config::{PipelineConfig, VerifierConfig};
pub use traits::{AuditStore, ChainLinker, MemoryGauge, MetricsSink, Signer};
