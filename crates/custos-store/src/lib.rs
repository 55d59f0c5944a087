//! # custos-store
//!
//! `AuditStore` implementations for the CUSTOS audit pipeline:
//!
//! - [`InMemoryAuditStore`] — ordered in-memory reference store for tests
//!   and demos.
//! - [`JsonlAuditStore`] — append-only JSON-lines file store with ordered
//!   read-back for verification jobs.
//!
//! The pipeline only ever sees the `AuditStore` trait; richer backends
//! (databases, object stores) plug in the same way.

pub mod file;
pub mod memory;

pub use file::JsonlAuditStore;
pub use memory::InMemoryAuditStore;
