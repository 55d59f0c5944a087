//! # custos-contracts
//!
//! Shared types and error contracts for the CUSTOS audit pipeline.
//!
//! Every crate in the workspace imports from here.  Only data definitions
//! and error types live in this crate; business logic belongs elsewhere.

pub mod error;
pub mod event;
pub mod report;
pub mod status;

pub use error::{CustosError, CustosResult};
pub use event::{AuditEvent, AuditEventType, AuditOutcome, ClientInfo, EventSignature};
pub use report::{VerificationReport, VerificationResult, VerificationStats};
pub use status::QueueStatus;
