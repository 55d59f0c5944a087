//! # custos-verify
//!
//! Downstream verification for the CUSTOS audit pipeline: replay a
//! persisted sequence of entries, re-derive the expected hashes and
//! signatures, and report every point of divergence.
//!
//! Verification failures are returned as data (`VerificationReport`), never
//! raised as errors, so a single bad entry cannot abort a bulk audit sweep.
//! Large ranges can be split across parallel shards with
//! [`ChainVerifier::verify_sharded`]; callers needing the shard seams
//! re-asserted run the sequential [`ChainVerifier::verify_chain`].

pub mod engine;

pub use engine::{ChainVerifier, VerificationJob};
