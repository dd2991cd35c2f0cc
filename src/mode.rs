//! Process-wide live/fallback switch with synchronous observers.
//!
//! One `ModeController` is shared (by cloning) across every binding of a
//! [`crate::SyncContext`]. `set` persists the new mode and then delivers it to
//! every listener before returning, so once it returns no binding can still be
//! acting on the old mode.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::observer::{Listeners, Subscription};
use crate::store::DurableStore;
use crate::types::{DataMode, SyncConfig};

struct ModeInner {
    mode: Cell<DataMode>,
    /// Bumped on every change; lets an outer delivery pass notice that a
    /// listener published a newer mode re-entrantly.
    version: Cell<u64>,
    store: Rc<dyn DurableStore>,
    key: String,
    listeners: Listeners<DataMode>,
}

#[derive(Clone)]
pub struct ModeController {
    inner: Rc<ModeInner>,
}

impl ModeController {
    /// Restore the persisted mode under `key`, or start in `default_mode`.
    pub fn new<S: Into<String>>(
        store: Rc<dyn DurableStore>,
        key: S,
        default_mode: DataMode,
    ) -> Self {
        let key = key.into();
        let mode = restore(store.as_ref(), &key).unwrap_or(default_mode);
        tracing::debug!(target: "fieldsync::mode", mode = mode.label(), "mode restored");
        Self {
            inner: Rc::new(ModeInner {
                mode: Cell::new(mode),
                version: Cell::new(0),
                store,
                key,
                listeners: Listeners::new(),
            }),
        }
    }

    pub fn from_config(store: Rc<dyn DurableStore>, config: &SyncConfig) -> Self {
        Self::new(store, config.mode_key.clone(), config.default_mode)
    }

    #[must_use]
    pub fn get(&self) -> DataMode {
        self.inner.mode.get()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.get().is_live()
    }

    /// Persist `mode`, then deliver it to every listener. Setting the current
    /// mode again is a no-op.
    pub fn set(&self, mode: DataMode) {
        let previous = self.inner.mode.get();
        if previous == mode {
            return;
        }
        self.inner.mode.set(mode);
        let version = self.inner.version.get() + 1;
        self.inner.version.set(version);

        if let Err(err) = self
            .inner
            .store
            .save(&self.inner.key, &Value::Bool(mode.fallback_flag()))
        {
            tracing::warn!(
                target: "fieldsync::mode",
                key = %self.inner.key,
                error = %err,
                "failed to persist data mode"
            );
        }
        tracing::info!(
            target: "fieldsync::mode",
            from = previous.label(),
            to = mode.label(),
            listeners = self.inner.listeners.len(),
            "data mode changed"
        );

        let inner = Rc::clone(&self.inner);
        self.inner
            .listeners
            .notify_while(&mode, move || inner.version.get() == version);
    }

    /// Register `listener` for every subsequent mode change. Drop the returned
    /// guard (or call [`Subscription::unsubscribe`]) to stop listening.
    pub fn subscribe(&self, listener: impl Fn(DataMode) + 'static) -> Subscription {
        self.inner.listeners.subscribe(move |mode| listener(*mode))
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeController")
            .field("mode", &self.get())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn restore(store: &dyn DurableStore, key: &str) -> Option<DataMode> {
    match store.load(key) {
        Ok(Some(Value::Bool(fallback))) => Some(DataMode::from_fallback_flag(fallback)),
        Ok(None) => None,
        Ok(Some(other)) => {
            tracing::warn!(
                target: "fieldsync::mode",
                key,
                value = %other,
                "ignoring malformed persisted mode"
            );
            None
        }
        Err(err) => {
            tracing::warn!(
                target: "fieldsync::mode",
                key,
                error = %err,
                "persisted mode unreadable"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MODE_FLAG_KEY;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::cell::RefCell;

    fn controller(store: &MemoryStore) -> ModeController {
        ModeController::new(Rc::new(store.clone()), MODE_FLAG_KEY, DataMode::Fallback)
    }

    #[test]
    fn cold_start_defaults_to_fallback_then_restores_persisted_value() {
        let store = MemoryStore::new();
        let first = controller(&store);
        assert_eq!(first.get(), DataMode::Fallback);
        first.set(DataMode::Live);
        assert_eq!(store.load(MODE_FLAG_KEY).unwrap(), Some(json!(false)));

        let restarted = controller(&store);
        assert_eq!(restarted.get(), DataMode::Live);
    }

    #[test]
    fn malformed_persisted_value_uses_default() {
        let store = MemoryStore::new();
        store.save(MODE_FLAG_KEY, &json!("live")).unwrap();
        assert_eq!(controller(&store).get(), DataMode::Fallback);
    }

    #[test]
    fn listeners_observe_new_value_before_set_returns() {
        let store = MemoryStore::new();
        let mode = controller(&store);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _a = {
            let seen = Rc::clone(&seen);
            mode.subscribe(move |m| seen.borrow_mut().push(("a", m)))
        };
        let _b = {
            let seen = Rc::clone(&seen);
            mode.subscribe(move |m| seen.borrow_mut().push(("b", m)))
        };
        mode.set(DataMode::Live);
        assert_eq!(
            *seen.borrow(),
            vec![("a", DataMode::Live), ("b", DataMode::Live)]
        );
    }

    #[test]
    fn setting_same_mode_does_not_notify() {
        let store = MemoryStore::new();
        let mode = controller(&store);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let _sub = mode.subscribe(move |_| counter.set(counter.get() + 1));
        mode.set(DataMode::Fallback);
        assert_eq!(calls.get(), 0);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn reentrant_set_wins_and_old_value_is_not_delivered_afterwards() {
        let store = MemoryStore::new();
        let mode = controller(&store);
        let seen = Rc::new(RefCell::new(Vec::new()));

        // First listener forces fallback as soon as it sees live.
        let _forcer = {
            let handle = mode.clone();
            let seen = Rc::clone(&seen);
            mode.subscribe(move |m| {
                seen.borrow_mut().push(("forcer", m));
                if m == DataMode::Live {
                    handle.set(DataMode::Fallback);
                }
            })
        };
        let _observer = {
            let seen = Rc::clone(&seen);
            mode.subscribe(move |m| seen.borrow_mut().push(("observer", m)))
        };

        mode.set(DataMode::Live);
        assert_eq!(mode.get(), DataMode::Fallback);
        assert_eq!(
            *seen.borrow(),
            vec![
                ("forcer", DataMode::Live),
                ("forcer", DataMode::Fallback),
                ("observer", DataMode::Fallback),
            ]
        );
    }

    #[test]
    fn unavailable_store_still_notifies() {
        let store = MemoryStore::new();
        let mode = controller(&store);
        store.set_unavailable(true);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let _sub = mode.subscribe(move |_| counter.set(counter.get() + 1));
        mode.set(DataMode::Live);
        assert_eq!(calls.get(), 1);
        assert!(mode.is_live());
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let store = MemoryStore::new();
        let mode = controller(&store);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let sub = mode.subscribe(move |_| counter.set(counter.get() + 1));
        sub.unsubscribe();
        mode.set(DataMode::Live);
        assert_eq!(calls.get(), 0);
        assert_eq!(mode.listener_count(), 0);
    }
}
