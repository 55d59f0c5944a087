//! Ed25519 signing with age-based key rotation.
//!
//! The signer keeps one active signing key plus the verifying keys of every
//! key it has ever activated.  Entries signed before a rotation therefore
//! remain verifiable for the lifetime of the signer; `key_id` on the event
//! names the key to verify against.
//!
//! Private keys are never serialized or logged.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use tracing::{debug, info, warn};

use custos_contracts::{AuditEvent, CustosError, CustosResult, EventSignature};
use custos_core::traits::Signer;

use crate::chain::signing_payload;

/// How long a key may stay active before `needs_rotation()` reports true.
const DEFAULT_MAX_KEY_AGE_DAYS: i64 = 90;

struct KeyRing {
    active_id: String,
    active_key: SigningKey,
    activated_at: DateTime<Utc>,
    /// Every verifying key this signer ever activated, active one included.
    verifying: HashMap<String, VerifyingKey>,
}

impl KeyRing {
    fn with_fresh_key() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let id = format!("key-{}", uuid::Uuid::new_v4());
        let mut verifying = HashMap::new();
        verifying.insert(id.clone(), key.verifying_key());
        Self {
            active_id: id,
            active_key: key,
            activated_at: Utc::now(),
            verifying,
        }
    }
}

/// Ed25519 implementation of the `Signer` seam.
pub struct Ed25519Signer {
    keys: RwLock<KeyRing>,
    max_key_age: Duration,
}

impl Ed25519Signer {
    /// Create a signer with a freshly generated key and the default
    /// rotation policy (90 days).
    pub fn new() -> Self {
        Self::with_max_key_age(Duration::days(DEFAULT_MAX_KEY_AGE_DAYS))
    }

    /// Create a signer with an explicit rotation age.
    pub fn with_max_key_age(max_key_age: Duration) -> Self {
        let ring = KeyRing::with_fresh_key();
        info!(key_id = %ring.active_id, "signer initialized with fresh key");
        Self {
            keys: RwLock::new(ring),
            max_key_age,
        }
    }

    /// The id of the currently active signing key.
    pub fn active_key_id(&self) -> String {
        self.keys.read().active_id.clone()
    }

    /// Verify a batch, logging each failing entry.  Returns true only when
    /// every entry verifies.
    pub fn verify_batch(&self, events: &[AuditEvent]) -> bool {
        let mut invalid = 0usize;
        for event in events {
            if !self.verify(event) {
                invalid += 1;
                warn!(event_id = %event.id, "signature verification failed");
            }
        }
        if invalid > 0 {
            warn!(invalid, total = events.len(), "batch signature verification failed");
        }
        invalid == 0
    }
}

impl Default for Ed25519Signer {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for Ed25519Signer {
    /// Sign the event's canonical content plus `entry_hash` with the active
    /// key and attach the resulting `EventSignature`.
    ///
    /// The event must already be sequenced; signing an event without chain
    /// fields would produce a signature that can never verify against the
    /// persisted form.
    fn sign(&self, event: &mut AuditEvent) -> CustosResult<()> {
        if !event.is_sequenced() {
            return Err(CustosError::SigningFailed {
                reason: format!("event {} is not sequenced", event.id),
            });
        }

        let payload = signing_payload(event).map_err(|e| CustosError::SigningFailed {
            reason: e.to_string(),
        })?;

        let keys = self.keys.read();
        let signature = keys.active_key.sign(&payload);
        event.signature = Some(EventSignature {
            key_id: keys.active_id.clone(),
            signature: hex::encode(signature.to_bytes()),
        });
        debug!(event_id = %event.id, key_id = %keys.active_id, "event signed");
        Ok(())
    }

    /// Verify against whichever retained key signed the event.  Unsigned
    /// events, unknown key ids, undecodable signatures and mismatches all
    /// return false; verification failure is a reportable outcome, not an
    /// error.
    fn verify(&self, event: &AuditEvent) -> bool {
        let Some(attached) = &event.signature else {
            return false;
        };

        let Ok(payload) = signing_payload(event) else {
            return false;
        };

        let Ok(raw) = hex::decode(&attached.signature) else {
            return false;
        };
        let raw: [u8; 64] = match raw.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = ed25519_dalek::Signature::from_bytes(&raw);

        let keys = self.keys.read();
        let Some(verifying) = keys.verifying.get(&attached.key_id) else {
            warn!(event_id = %event.id, key_id = %attached.key_id, "unknown signing key");
            return false;
        };

        verifying.verify(&payload, &signature).is_ok()
    }

    fn needs_rotation(&self) -> bool {
        let keys = self.keys.read();
        Utc::now() - keys.activated_at >= self.max_key_age
    }

    /// Activate a fresh key.  The outgoing verifying key stays in the ring
    /// so previously signed entries keep verifying.
    fn rotate(&self) -> CustosResult<()> {
        let mut keys = self.keys.write();
        let new_key = SigningKey::generate(&mut OsRng);
        let new_id = format!("key-{}", uuid::Uuid::new_v4());
        keys.verifying.insert(new_id.clone(), new_key.verifying_key());

        let retired = std::mem::replace(&mut keys.active_id, new_id);
        keys.active_key = new_key;
        keys.activated_at = Utc::now();

        info!(retired_key = %retired, active_key = %keys.active_id, "signing key rotated");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
