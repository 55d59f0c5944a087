//! Hash-chain primitives: canonical event bytes and SHA-256 linking.
//!
//! Every field that contributes to an event's hash is listed explicitly so
//! nothing is accidentally omitted.  Fields are NUL-separated so adjacent
//! values cannot alias each other.
//!
//! Hash input layout (bytes, in order, each followed by a NUL):
//!   1. id as UTF-8
//!   2. timestamp as RFC 3339 UTF-8
//!   3. actor as UTF-8
//!   4. event type string
//!   5. resource as UTF-8
//!   6. outcome string
//!   7. client ip / user agent / session (absent fields contribute nothing
//!      beyond their NUL)
//!   8. canonical JSON of the details map (BTreeMap, so key order is fixed)
//!   9. prev_hash as UTF-8 (64 ASCII hex chars)

use sha2::{Digest, Sha256};

use custos_contracts::{AuditEvent, CustosError, CustosResult};
use custos_core::traits::ChainLinker;

/// Serialize the content fields of an event into canonical bytes.
///
/// The chain fields (`prev_hash`, `entry_hash`) and the signature do NOT
/// contribute: the hash must be recomputable from content alone, and the
/// signature is applied over the hash, not under it.
fn content_bytes(event: &AuditEvent) -> CustosResult<Vec<u8>> {
    let details =
        serde_json::to_vec(&event.details).map_err(|e| CustosError::HashingFailed {
            reason: format!("cannot canonicalize details of event {}: {e}", event.id),
        })?;

    let mut buf = Vec::with_capacity(128 + details.len());
    for field in [
        event.id.as_str(),
        &event.timestamp.to_rfc3339(),
        event.actor.as_str(),
        event.event_type.as_str(),
        event.resource.as_str(),
        event.outcome.as_str(),
        event.client.ip.as_deref().unwrap_or(""),
        event.client.user_agent.as_deref().unwrap_or(""),
        event.client.session.as_deref().unwrap_or(""),
    ] {
        buf.extend_from_slice(field.as_bytes());
        buf.push(0);
    }
    buf.extend_from_slice(&details);
    buf.push(0);
    Ok(buf)
}

/// The bytes a signature commits to: canonical content, the event's stored
/// `prev_hash`, and its `entry_hash`.
///
/// Only meaningful for sequenced events; the signer rejects events whose
/// chain fields are still empty.
pub fn signing_payload(event: &AuditEvent) -> CustosResult<Vec<u8>> {
    let mut buf = content_bytes(event)?;
    buf.extend_from_slice(event.prev_hash.as_bytes());
    buf.push(0);
    buf.extend_from_slice(event.entry_hash.as_bytes());
    Ok(buf)
}

/// SHA-256 implementation of the chain linker.
///
/// Stateless; the chain tip lives in the sequencer, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256ChainLinker;

impl Sha256ChainLinker {
    pub fn new() -> Self {
        Self
    }
}

impl ChainLinker for Sha256ChainLinker {
    /// Compute the lowercase 64-char hex hash of (content, `prev_hash`).
    fn compute_hash(&self, event: &AuditEvent, prev_hash: &str) -> CustosResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(content_bytes(event)?);
        hasher.update(prev_hash.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Check both chain rules for one entry:
    ///
    /// 1. Prev-hash linkage: the stored `prev_hash` equals `prev_hash`.
    /// 2. Hash correctness: `entry_hash` matches a recomputation from the
    ///    event's content and the supplied `prev_hash`.
    fn verify_entry(&self, event: &AuditEvent, prev_hash: &str) -> CustosResult<bool> {
        if event.prev_hash != prev_hash {
            return Ok(false);
        }
        let recomputed = self.compute_hash(event, prev_hash)?;
        Ok(recomputed == event.entry_hash)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
