//! Durable key-value storage for the mode flag and the error ledger.

mod file;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

pub use file::FileStore;

use crate::{Result, SyncError};

/// Minimal persisted key-value contract the sync layer needs.
///
/// Values are JSON so the on-disk layout stays readable (`mode-flag` is a bare
/// boolean, `index-error-ledger` an array of strings).
pub trait DurableStore {
    /// Read a key; a key that was never written is `Ok(None)`.
    fn load(&self, key: &str) -> Result<Option<Value>>;

    fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a key entirely. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store. Clones share the same map, so a second controller built
/// over a clone observes what the first persisted (a process restart, in tests).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, Value>>>,
    unavailable: Rc<Cell<bool>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`SyncError::StoreUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.unavailable.get() {
            return Err(SyncError::StoreUnavailable {
                key: key.to_string(),
                reason: "memory store marked unavailable".into(),
            });
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        self.check(key)?;
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.check(key)?;
        self.entries.borrow_mut().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}
