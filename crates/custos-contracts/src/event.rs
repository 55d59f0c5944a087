//! Audit event types.
//!
//! `AuditEvent` is the unit of record flowing through the pipeline.  An event
//! is created fully populated by the producer; the sequencer later sets the
//! two chain fields (`prev_hash`, `entry_hash`) exactly once, and the signer
//! attaches an `EventSignature`.  Nothing else is ever mutated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an audited operation.
///
/// The classification drives the backpressure policy: high-risk events are
/// never silently dropped, and their presence in the queue can trigger an
/// immediate flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A principal authenticated.
    Login,
    /// A principal ended its session.
    Logout,
    /// An authorization check rejected a request.
    AccessDenied,
    /// A generic API endpoint was invoked.
    ApiAccess,
    /// A resource was created.
    Create,
    /// A resource was modified.
    Update,
    /// A resource was deleted.
    Delete,
    /// System configuration was changed.
    ConfigChange,
    /// A principal's permissions were changed.
    PermissionChange,
    /// Data left the system boundary.
    DataExport,
    /// A security policy violation was detected.
    SecurityViolation,
}

impl AuditEventType {
    /// True for event types that must never be dropped under backpressure.
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied
                | Self::Delete
                | Self::ConfigChange
                | Self::PermissionChange
                | Self::DataExport
                | Self::SecurityViolation
        )
    }

    /// Stable string form, used in hashing and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::AccessDenied => "access_denied",
            Self::ApiAccess => "api_access",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::ConfigChange => "config_change",
            Self::PermissionChange => "permission_change",
            Self::DataExport => "data_export",
            Self::SecurityViolation => "security_violation",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation completed.
    Success,
    /// The operation was rejected by an authorization decision.
    Denied,
    /// The operation was attempted and failed.
    Failure,
}

impl AuditOutcome {
    /// Stable string form, used in hashing and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network/client metadata captured with an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Remote address the request originated from.
    pub ip: Option<String>,
    /// The caller's user-agent string, when one was presented.
    pub user_agent: Option<String>,
    /// Session identifier, when the caller had one.
    pub session: Option<String>,
}

impl ClientInfo {
    /// Metadata-free client info, for system-originated events.
    pub fn none() -> Self {
        Self::default()
    }
}

/// A signature attached to an event after sequencing.
///
/// `key_id` names the signing key that was active at acceptance time, so
/// entries signed before a key rotation remain verifiable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSignature {
    /// Identifier of the key that produced this signature.
    pub key_id: String,
    /// Hex-encoded signature bytes.
    pub signature: String,
}

/// A single audit event, chain-linked once accepted.
///
/// Invariant: for consecutive accepted events A then B,
/// `B.prev_hash == A.entry_hash`.  Ordering is acceptance order into the
/// sequencer, not arrival order of the producer call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Generated identifier (UUID v4).
    pub id: String,

    /// Wall-clock time (UTC) the event was constructed.
    pub timestamp: DateTime<Utc>,

    /// The principal that performed the operation.
    pub actor: String,

    /// The operation classification.
    pub event_type: AuditEventType,

    /// The resource the operation targeted.
    pub resource: String,

    /// What happened.
    pub outcome: AuditOutcome,

    /// Network/client metadata.
    pub client: ClientInfo,

    /// Free-form structured detail.  A `BTreeMap` keeps canonical JSON
    /// deterministic, which the hash chain requires.
    pub details: BTreeMap<String, serde_json::Value>,

    /// Chain hash of the immediately preceding accepted event, or
    /// `GENESIS_HASH` for the first event.  Empty until sequenced.
    pub prev_hash: String,

    /// SHA-256 hash (hex) over this event's content and `prev_hash`.
    /// Empty until sequenced.
    pub entry_hash: String,

    /// Signature over the event's canonical content plus `entry_hash`.
    /// `None` until signed.
    pub signature: Option<EventSignature>,
}

impl AuditEvent {
    /// The sentinel `prev_hash` for the first event in a chain.
    ///
    /// 64 hex zeros, a value that can never be the SHA-256 of real data,
    /// making genesis detection unambiguous.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    /// Create a new, not-yet-sequenced event.
    ///
    /// The chain fields start empty and the signature absent; the ingestion
    /// pipeline fills them during `record()`.
    pub fn new(
        actor: impl Into<String>,
        event_type: AuditEventType,
        resource: impl Into<String>,
        outcome: AuditOutcome,
        client: ClientInfo,
        details: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: actor.into(),
            event_type,
            resource: resource.into(),
            outcome,
            client,
            details,
            prev_hash: String::new(),
            entry_hash: String::new(),
            signature: None,
        }
    }

    /// True once the sequencer has assigned the chain fields.
    pub fn is_sequenced(&self) -> bool {
        !self.entry_hash.is_empty()
    }
}
