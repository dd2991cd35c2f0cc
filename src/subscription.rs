//! Opens and closes live backend queries and decodes what they deliver.
//!
//! The manager never deduplicates across callers; each `open` creates exactly
//! one backend listener. Keeping a single listener per binding is the
//! binding's job. Rows are decoded into typed entities here, so nothing past
//! this boundary handles raw documents.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::backend::{Backend, BackendError, Unsubscribe, WriteAck, WriteOp};
use crate::types::{BindingKey, Document, Entity, QuerySpec};

type ActiveCounts = RefCell<BTreeMap<BindingKey, usize>>;

pub struct SubscriptionManager {
    backend: Rc<dyn Backend>,
    active: Rc<ActiveCounts>,
    next_handle: Cell<u64>,
}

impl SubscriptionManager {
    pub fn new(backend: Rc<dyn Backend>) -> Self {
        Self {
            backend,
            active: Rc::new(RefCell::new(BTreeMap::new())),
            next_handle: Cell::new(0),
        }
    }

    /// Open one live query. `on_snapshot` gets the full decoded result set on
    /// every change (never a diff); `on_error` gets the raw backend error.
    ///
    /// Callbacks may fire before this returns if the backend delivers
    /// synchronously.
    pub fn open<T, S, E>(
        &self,
        query: &QuerySpec,
        mut on_snapshot: S,
        on_error: E,
    ) -> SubscriptionHandle
    where
        T: Entity,
        S: FnMut(Vec<T>) + 'static,
        E: FnMut(BackendError) + 'static,
    {
        let id = self.next_handle.get();
        self.next_handle.set(id + 1);
        let key = query.key();
        *self.active.borrow_mut().entry(key.clone()).or_insert(0) += 1;
        tracing::debug!(
            target: "fieldsync::subscription",
            handle = id,
            key = %key,
            "opening live query"
        );

        let collection = query.collection.clone();
        let unsubscribe = self.backend.subscribe(
            query,
            Box::new(move |docs: Vec<Document>| on_snapshot(decode_rows(&collection, docs))),
            Box::new(on_error),
        );

        SubscriptionHandle {
            id,
            key,
            unsubscribe: Some(unsubscribe),
            active: Rc::downgrade(&self.active),
        }
    }

    /// One-shot read with no handle and no cancellation; `done` may run after
    /// the caller has lost interest and must check for that itself.
    pub fn query<T, F>(&self, query: &QuerySpec, done: F)
    where
        T: Entity,
        F: FnOnce(Result<Vec<T>, BackendError>) + 'static,
    {
        tracing::debug!(target: "fieldsync::subscription", key = %query.key(), "one-shot query");
        let collection = query.collection.clone();
        self.backend.query(
            query,
            Box::new(move |result: Result<Vec<Document>, BackendError>| {
                done(result.map(|docs| decode_rows(&collection, docs)));
            }),
        );
    }

    /// Pass a write through to the backend (forms use this; the read path never does).
    pub fn write<F>(&self, collection: &str, op: WriteOp, done: F)
    where
        F: FnOnce(Result<WriteAck, BackendError>) + 'static,
    {
        self.backend.write(collection, op, Box::new(done));
    }

    /// Handles currently open for `key` across every caller.
    #[must_use]
    pub fn active_count(&self, key: &BindingKey) -> usize {
        self.active.borrow().get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_active(&self) -> usize {
        self.active.borrow().values().sum()
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active", &self.total_active())
            .finish_non_exhaustive()
    }
}

/// Decode every row, dropping (and logging) the ones that fail validation.
fn decode_rows<T: Entity>(collection: &str, docs: Vec<Document>) -> Vec<T> {
    let mut rows = Vec::with_capacity(docs.len());
    for doc in &docs {
        match T::decode(collection, doc) {
            Ok(row) => rows.push(row),
            Err(err) => tracing::warn!(
                target: "fieldsync::subscription",
                collection,
                id = %doc.id,
                error = %err,
                "dropping document that failed validation"
            ),
        }
    }
    rows
}

/// One open live query. Closing is idempotent and also happens on drop.
pub struct SubscriptionHandle {
    id: u64,
    key: BindingKey,
    unsubscribe: Option<Unsubscribe>,
    active: Weak<ActiveCounts>,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &BindingKey {
        &self.key
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.unsubscribe.is_some()
    }

    /// Detach the backend listener. Safe to call repeatedly and after the
    /// listener has already failed.
    pub fn close(&mut self) {
        let Some(unsubscribe) = self.unsubscribe.take() else {
            return;
        };
        unsubscribe();
        if let Some(active) = self.active.upgrade() {
            let mut counts = active.borrow_mut();
            if let Some(count) = counts.get_mut(&self.key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&self.key);
                }
            }
        }
        tracing::debug!(
            target: "fieldsync::subscription",
            handle = self.id,
            key = %self.key,
            "closed live query"
        );
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendErrorCode, InMemoryBackend};
    use crate::types::Task;
    use serde_json::json;

    fn setup() -> (InMemoryBackend, SubscriptionManager) {
        let backend = InMemoryBackend::new();
        backend.put_document("tasks", Document::from_json("t1", json!({"title": "Spray"})));
        backend.put_document("tasks", Document::from_json("t2", json!({"title": ""})));
        let manager = SubscriptionManager::new(Rc::new(backend.clone()));
        (backend, manager)
    }

    #[test]
    fn open_decodes_and_drops_invalid_rows() {
        let (backend, manager) = setup();
        let seen: Rc<RefCell<Vec<Vec<Task>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let query = QuerySpec::collection("tasks");
        let mut handle = manager.open(
            &query,
            move |rows: Vec<Task>| sink.borrow_mut().push(rows),
            |_| {},
        );
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].len(), 1);
        assert_eq!(seen.borrow()[0][0].title, "Spray");
        assert_eq!(manager.active_count(&query.key()), 1);
        assert_eq!(backend.open_listeners(), 1);

        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(manager.active_count(&query.key()), 0);
        assert_eq!(backend.stats().unsubscribes, 1);
    }

    #[test]
    fn manager_does_not_deduplicate_across_callers() {
        let (backend, manager) = setup();
        let query = QuerySpec::collection("tasks");
        let _a = manager.open(&query, |_: Vec<Task>| {}, |_| {});
        let _b = manager.open(&query, |_: Vec<Task>| {}, |_| {});
        assert_eq!(manager.active_count(&query.key()), 2);
        assert_eq!(backend.open_listeners(), 2);
    }

    #[test]
    fn close_after_backend_failure_is_safe() {
        let (backend, manager) = setup();
        backend.fail_collection(
            "tasks",
            BackendError::new(BackendErrorCode::PermissionDenied, "denied"),
        );
        let errors = Rc::new(Cell::new(0));
        let counter = Rc::clone(&errors);
        let mut handle = manager.open(
            &QuerySpec::collection("tasks"),
            |_: Vec<Task>| {},
            move |_| counter.set(counter.get() + 1),
        );
        assert_eq!(errors.get(), 1);
        handle.close();
        drop(handle);
        assert_eq!(manager.total_active(), 0);
    }

    #[test]
    fn one_shot_query_decodes() {
        let (_backend, manager) = setup();
        let count = Rc::new(Cell::new(usize::MAX));
        let slot = Rc::clone(&count);
        manager.query(
            &QuerySpec::collection("tasks"),
            move |result: Result<Vec<Task>, BackendError>| {
                slot.set(result.map(|rows| rows.len()).unwrap_or(0));
            },
        );
        assert_eq!(count.get(), 1);
    }
}
