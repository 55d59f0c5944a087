//! # custos-crypto
//!
//! Default implementations of the two crypto leaves of the CUSTOS audit
//! pipeline: the SHA-256 hash-chain linker and the Ed25519 signer with
//! age-based key rotation.
//!
//! Both are injected into the pipeline through the `custos-core` trait
//! seams; nothing in the core depends on these concrete types.

pub mod chain;
pub mod signer;

pub use chain::{signing_payload, Sha256ChainLinker};
pub use signer::Ed25519Signer;
