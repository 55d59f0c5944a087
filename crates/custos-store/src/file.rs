//! Append-only JSON-lines implementation of `AuditStore`.
//!
//! One event per line, written through a buffered writer that is flushed at
//! the end of every batch, so a committed batch survives process restart.
//! `load()` reads the persisted sequence back in order for verification
//! jobs; unparseable lines are skipped with a warning rather than aborting
//! the read, matching the pipeline's find-every-divergence philosophy.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use custos_contracts::{AuditEvent, CustosError, CustosResult};
use custos_core::traits::AuditStore;

/// An append-only JSON-lines file store.
pub struct JsonlAuditStore {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlAuditStore {
    /// Open (creating if necessary) the store file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::StorageFailed` when the file or its parent
    /// directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> CustosResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CustosError::StorageFailed {
                    reason: format!("cannot create {}: {e}", parent.display()),
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CustosError::StorageFailed {
                reason: format!("cannot open {}: {e}", path.display()),
            })?;
        info!(path = %path.display(), "audit store opened");
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every persisted entry back, in the order it was written.
    ///
    /// Unparseable lines are skipped with a warning so one corrupt line
    /// cannot hide the rest of the log from a verification sweep.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::StorageFailed` when the file cannot be read.
    pub fn load(&self) -> CustosResult<Vec<AuditEvent>> {
        // Make buffered-but-unflushed writes visible to the reader.
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.flush().map_err(|e| CustosError::StorageFailed {
                reason: format!("flush before load failed: {e}"),
            })?;
        }

        let file = File::open(&self.path).map_err(|e| CustosError::StorageFailed {
            reason: format!("cannot read {}: {e}", self.path.display()),
        })?;

        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CustosError::StorageFailed {
                reason: format!("read failed at line {}: {e}", line_no + 1),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => entries.push(event),
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "skipping unparseable audit line");
                }
            }
        }
        Ok(entries)
    }

    /// Number of parseable entries currently persisted.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::StorageFailed` when the file cannot be read.
    pub fn entry_count(&self) -> CustosResult<usize> {
        Ok(self.load()?.len())
    }
}

impl AuditStore for JsonlAuditStore {
    /// Append one ordered batch, flushing once at the end so the whole
    /// batch is durable before the call returns.
    fn batch_save(&self, events: &[AuditEvent]) -> CustosResult<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(CustosError::StoreClosed)?;

        for event in events {
            let json = serde_json::to_string(event).map_err(|e| CustosError::StorageFailed {
                reason: format!("cannot serialize event {}: {e}", event.id),
            })?;
            writeln!(writer, "{json}").map_err(|e| CustosError::StorageFailed {
                reason: format!("write failed: {e}"),
            })?;
        }
        writer.flush().map_err(|e| CustosError::StorageFailed {
            reason: format!("flush failed: {e}"),
        })?;

        debug!(count = events.len(), path = %self.path.display(), "batch persisted");
        Ok(())
    }

    fn close(&self) -> CustosResult<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush().map_err(|e| CustosError::StorageFailed {
                reason: format!("final flush failed: {e}"),
            })?;
            info!(path = %self.path.display(), "audit store closed");
        }
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
        let mut details = BTreeMap::new();
        details.insert("n".to_string(), serde_json::json!(1));
        AuditEvent::new(
            actor,
            AuditEventType::Create,
            "/api/records",
            AuditOutcome::Success,
            ClientInfo::none(),
            details,
        )
    }

    #[test]
    fn save_then_load_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::open(dir.path().join("audit.jsonl")).unwrap();

        store.batch_save(&[make_event("a"), make_event("b")]).unwrap();
        store.batch_save(&[make_event("c")]).unwrap();

        let actors: Vec<String> = store.load().unwrap().into_iter().map(|e| e.actor).collect();
        assert_eq!(actors, vec!["a", "b", "c"]);
        assert_eq!(store.entry_count().unwrap(), 3);
    }

    #[test]
    fn load_skips_unparseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = JsonlAuditStore::open(&path).unwrap();
        store.batch_save(&[make_event("a")]).unwrap();
        store.close().unwrap();

        // Corrupt the log with a non-JSON line, then append another entry.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "not json at all").unwrap();
        }
        let reopened = JsonlAuditStore::open(&path).unwrap();
        reopened.batch_save(&[make_event("b")]).unwrap();

        let actors: Vec<String> =
            reopened.load().unwrap().into_iter().map(|e| e.actor).collect();
        assert_eq!(actors, vec!["a", "b"]);
    }

    #[test]
    fn save_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::open(dir.path().join("audit.jsonl")).unwrap();
        store.close().unwrap();

        let err = store.batch_save(&[make_event("a")]).unwrap_err();
        assert!(matches!(err, CustosError::StoreClosed));
    }

    #[test]
    fn load_still_works_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::open(dir.path().join("audit.jsonl")).unwrap();
        store.batch_save(&[make_event("a")]).unwrap();
        store.close().unwrap();

        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = JsonlAuditStore::open(&path).unwrap();
        first.batch_save(&[make_event("a")]).unwrap();
        first.close().unwrap();

        let second = JsonlAuditStore::open(&path).unwrap();
        second.batch_save(&[make_event("b")]).unwrap();

        assert_eq!(second.entry_count().unwrap(), 2);
    }
}
