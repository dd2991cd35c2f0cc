//! Persisted, append-only, deduplicated set of recoverable-error keys.
//!
//! The UI renders its remediation banner from [`ErrorLedger::list`]. The
//! durable store is read once, when the ledger is opened; from then on the
//! in-memory mirror is the source of truth and every change is written through
//! best-effort, so a store that cannot be written never blocks the data path
//! nor resurrects cleared entries.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::store::DurableStore;
use crate::{Result, SyncError};

pub struct ErrorLedger {
    store: Rc<dyn DurableStore>,
    key: String,
    mirror: RefCell<Vec<String>>,
}

impl ErrorLedger {
    /// Open the ledger stored under `key`, loading whatever a previous process
    /// persisted.
    pub fn new<S: Into<String>>(store: Rc<dyn DurableStore>, key: S) -> Self {
        let ledger = Self {
            store,
            key: key.into(),
            mirror: RefCell::new(Vec::new()),
        };
        if let Some(entries) = ledger.read_persisted() {
            *ledger.mirror.borrow_mut() = entries;
        }
        ledger
    }

    /// Record `dedup_key` if it has not been seen before. Returns true when the
    /// key was new.
    pub fn add(&self, dedup_key: &str) -> bool {
        let value = {
            let mut entries = self.mirror.borrow_mut();
            if entries.iter().any(|entry| entry == dedup_key) {
                return false;
            }
            entries.push(dedup_key.to_string());
            Value::from(entries.clone())
        };
        if let Err(err) = self.store.save(&self.key, &value) {
            tracing::warn!(
                target: "fieldsync::ledger",
                key = %self.key,
                error = %err,
                "failed to persist error ledger; keeping entry in memory"
            );
        }
        tracing::info!(target: "fieldsync::ledger", dedup_key, "recorded index-required error");
        true
    }

    /// Keys in first-seen order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.mirror.borrow().clone()
    }

    #[must_use]
    pub fn contains(&self, dedup_key: &str) -> bool {
        self.mirror.borrow().iter().any(|entry| entry == dedup_key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mirror.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, including the persisted key.
    pub fn clear(&self) {
        self.mirror.borrow_mut().clear();
        if let Err(err) = self.store.remove(&self.key) {
            tracing::warn!(
                target: "fieldsync::ledger",
                key = %self.key,
                error = %err,
                "failed to clear persisted error ledger"
            );
        }
    }

    fn read_persisted(&self) -> Option<Vec<String>> {
        match self.store.load(&self.key).and_then(|value| decode(&self.key, value)) {
            Ok(entries) => Some(entries),
            Err(err) => {
                tracing::warn!(
                    target: "fieldsync::ledger",
                    key = %self.key,
                    error = %err,
                    "error ledger unreadable; starting empty"
                );
                None
            }
        }
    }
}

fn decode(key: &str, value: Option<Value>) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or_else(|| SyncError::InvalidStoredValue {
        key: key.to_string(),
        reason: "expected an array of strings".into(),
    })?;
    let mut entries: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let Some(entry) = item.as_str() else {
            return Err(SyncError::InvalidStoredValue {
                key: key.to_string(),
                reason: format!("non-string entry {item}"),
            });
        };
        if !entries.iter().any(|seen| seen == entry) {
            entries.push(entry.to_string());
        }
    }
    Ok(entries)
}

impl std::fmt::Debug for ErrorLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLedger")
            .field("key", &self.key)
            .field("entries", &self.mirror.borrow().len())
            .finish()
    }
}
