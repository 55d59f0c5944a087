//! In-memory implementation of `AuditStore`.
//!
//! `InMemoryAuditStore` is the reference implementation: an ordered `Vec`
//! behind a mutex.  It backs tests and demos, and `export()` gives direct
//! access to the persisted sequence for verification.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use custos_contracts::{AuditEvent, CustosError, CustosResult};
use custos_core::traits::AuditStore;

/// An append-only, order-preserving in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEvent>>,
    closed: AtomicBool,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True once `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A copy of every persisted entry, in the order it was saved.
    pub fn export(&self) -> Vec<AuditEvent> {
        self.entries.lock().clone()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn batch_save(&self, events: &[AuditEvent]) -> CustosResult<()> {
        if self.is_closed() {
            return Err(CustosError::StoreClosed);
        }
        let mut entries = self.entries.lock();
        entries.extend_from_slice(events);
        debug!(count = events.len(), total = entries.len(), "batch saved in memory");
        Ok(())
    }

    fn close(&self) -> CustosResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use custos_contracts::{AuditEventType, AuditOutcome, ClientInfo};

    use super::*;

    fn make_event(actor: &str) -> AuditEvent {
        AuditEvent::new(
            actor,
            AuditEventType::ApiAccess,
            "/api/data",
            AuditOutcome::Success,
            ClientInfo::none(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn batches_append_in_order() {
        let store = InMemoryAuditStore::new();
        let first = vec![make_event("a"), make_event("b")];
        let second = vec![make_event("c")];

        store.batch_save(&first).unwrap();
        store.batch_save(&second).unwrap();

        let actors: Vec<String> = store.export().into_iter().map(|e| e.actor).collect();
        assert_eq!(actors, vec!["a", "b", "c"]);
    }

    #[test]
    fn save_after_close_fails() {
        let store = InMemoryAuditStore::new();
        store.close().unwrap();

        let err = store.batch_save(&[make_event("a")]).unwrap_err();
        assert!(matches!(err, CustosError::StoreClosed));
        assert!(store.is_closed());
        assert!(store.is_empty());
    }
}
