//! In-process document store implementing [`Backend`].
//!
//! Used by tests and offline demos. Deliveries go through an outbox drained by
//! a non-reentrant loop, which models the cooperative event loop pages run on:
//! a callback that writes, subscribes, or unsubscribes never re-enters another
//! callback. With manual delivery enabled nothing is delivered until
//! [`InMemoryBackend::flush`], which is how tests hold a query "in flight".

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use serde_json::Value;
use uuid::Uuid;

use super::{
    Backend, BackendError, BackendErrorCode, ErrorCallback, QueryCallback, SnapshotCallback,
    Unsubscribe, WriteAck, WriteCallback, WriteOp,
};
use crate::types::{BindingKey, Direction, Document, Filter, FilterOp, QuerySpec};

/// Call counters, for asserting subscription hygiene.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BackendStats {
    pub subscribes: u64,
    pub unsubscribes: u64,
    pub queries: u64,
    pub writes: u64,
}

struct Listener {
    id: u64,
    query: QuerySpec,
    on_next: Rc<RefCell<SnapshotCallback>>,
    on_error: Rc<RefCell<ErrorCallback>>,
}

enum Delivery {
    Snapshot { listener: u64, docs: Vec<Document> },
    Error { listener: u64, error: BackendError },
    Query {
        done: QueryCallback,
        result: Result<Vec<Document>, BackendError>,
    },
    Write {
        done: WriteCallback,
        result: Result<WriteAck, BackendError>,
    },
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    listeners: Vec<Listener>,
    next_listener: u64,
    failures: HashMap<String, BackendError>,
    outbox: VecDeque<Delivery>,
    draining: bool,
    manual: bool,
    stats: BackendStats,
}

impl State {
    fn rows(&self, query: &QuerySpec) -> Vec<Document> {
        let docs = self
            .collections
            .get(&query.collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        evaluate(query, docs)
    }

    /// Queue a fresh result set for every listener on `collection`.
    fn fan_out(&mut self, collection: &str) {
        let deliveries: Vec<Delivery> = self
            .listeners
            .iter()
            .filter(|listener| listener.query.collection == collection)
            .map(|listener| Delivery::Snapshot {
                listener: listener.id,
                docs: self.rows(&listener.query),
            })
            .collect();
        self.outbox.extend(deliveries);
    }

    fn apply(&mut self, collection: &str, op: WriteOp) -> Result<WriteAck, BackendError> {
        let docs = self.collections.entry(collection.to_string()).or_default();
        match op {
            WriteOp::Insert { fields } => {
                let id = Uuid::new_v4().simple().to_string();
                docs.insert(id.clone(), Document::new(id.clone(), fields));
                Ok(WriteAck { id })
            }
            WriteOp::Update { id, fields } => {
                let doc = docs.get_mut(&id).ok_or_else(|| {
                    BackendError::new(
                        BackendErrorCode::NotFound,
                        format!("No document to update: {collection}/{id}"),
                    )
                })?;
                doc.fields.extend(fields);
                Ok(WriteAck { id })
            }
            WriteOp::Delete { id } => {
                docs.remove(&id);
                Ok(WriteAck { id })
            }
        }
    }
}

/// Shared handle to an in-memory store. Clones address the same store.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Rc<RefCell<State>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document as if another client wrote it; live
    /// listeners on the collection receive a new snapshot.
    pub fn put_document(&self, collection: &str, doc: Document) {
        {
            let mut state = self.state.borrow_mut();
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(doc.id.clone(), doc);
            state.fan_out(collection);
        }
        self.flush_if_auto();
    }

    /// Every subscribe or query against `collection` fails with `error` until
    /// [`InMemoryBackend::clear_failure`] is called.
    pub fn fail_collection(&self, collection: &str, error: BackendError) {
        self.state
            .borrow_mut()
            .failures
            .insert(collection.to_string(), error);
    }

    pub fn clear_failure(&self, collection: &str) {
        self.state.borrow_mut().failures.remove(collection);
    }

    /// Push a terminal error to every live listener on `collection`.
    pub fn emit_error(&self, collection: &str, error: &BackendError) {
        {
            let mut state = self.state.borrow_mut();
            let targets: Vec<u64> = state
                .listeners
                .iter()
                .filter(|listener| listener.query.collection == collection)
                .map(|listener| listener.id)
                .collect();
            for listener in targets {
                state.outbox.push_back(Delivery::Error {
                    listener,
                    error: error.clone(),
                });
            }
        }
        self.flush_if_auto();
    }

    /// Hold every delivery in the outbox until [`InMemoryBackend::flush`].
    pub fn set_manual_delivery(&self, manual: bool) {
        self.state.borrow_mut().manual = manual;
        if !manual {
            self.flush();
        }
    }

    #[must_use]
    pub fn pending_deliveries(&self) -> usize {
        self.state.borrow().outbox.len()
    }

    /// Deliver everything queued, including deliveries queued by callbacks.
    pub fn flush(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let next = self.state.borrow_mut().outbox.pop_front();
            let Some(delivery) = next else { break };
            self.deliver(delivery);
        }
        self.state.borrow_mut().draining = false;
    }

    #[must_use]
    pub fn stats(&self) -> BackendStats {
        self.state.borrow().stats
    }

    #[must_use]
    pub fn open_listeners(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    #[must_use]
    pub fn open_listeners_for(&self, key: &BindingKey) -> usize {
        self.state
            .borrow()
            .listeners
            .iter()
            .filter(|listener| listener.query.key() == *key)
            .count()
    }

    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .borrow()
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn flush_if_auto(&self) {
        if !self.state.borrow().manual {
            self.flush();
        }
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Snapshot { listener, docs } => {
                let callback = self.listener_callback(listener, |entry| Rc::clone(&entry.on_next));
                if let Some(callback) = callback {
                    (&mut *callback.borrow_mut())(docs);
                }
            }
            Delivery::Error { listener, error } => {
                let callback = {
                    let mut state = self.state.borrow_mut();
                    let position = state
                        .listeners
                        .iter()
                        .position(|entry| entry.id == listener);
                    // A listener that errored is dead; the backend drops it.
                    position.map(|index| state.listeners.remove(index).on_error)
                };
                if let Some(callback) = callback {
                    (&mut *callback.borrow_mut())(error);
                }
            }
            Delivery::Query { done, result } => done(result),
            Delivery::Write { done, result } => done(result),
        }
    }

    fn listener_callback<C>(&self, listener: u64, pick: impl Fn(&Listener) -> C) -> Option<C> {
        self.state
            .borrow()
            .listeners
            .iter()
            .find(|entry| entry.id == listener)
            .map(pick)
    }
}

impl Backend for InMemoryBackend {
    fn subscribe(
        &self,
        query: &QuerySpec,
        on_next: SnapshotCallback,
        on_error: ErrorCallback,
    ) -> Unsubscribe {
        let id = {
            let mut state = self.state.borrow_mut();
            state.stats.subscribes += 1;
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.push(Listener {
                id,
                query: query.clone(),
                on_next: Rc::new(RefCell::new(on_next)),
                on_error: Rc::new(RefCell::new(on_error)),
            });
            let initial = match state.failures.get(&query.collection) {
                Some(error) => Delivery::Error {
                    listener: id,
                    error: error.clone(),
                },
                None => Delivery::Snapshot {
                    listener: id,
                    docs: state.rows(query),
                },
            };
            state.outbox.push_back(initial);
            id
        };
        self.flush_if_auto();

        let weak: Weak<RefCell<State>> = Rc::downgrade(&self.state);
        Box::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.borrow_mut();
                state.stats.unsubscribes += 1;
                state.listeners.retain(|entry| entry.id != id);
            }
        })
    }

    fn query(&self, query: &QuerySpec, done: QueryCallback) {
        {
            let mut state = self.state.borrow_mut();
            state.stats.queries += 1;
            let result = match state.failures.get(&query.collection) {
                Some(error) => Err(error.clone()),
                None => Ok(state.rows(query)),
            };
            state.outbox.push_back(Delivery::Query { done, result });
        }
        self.flush_if_auto();
    }

    fn write(&self, collection: &str, op: WriteOp, done: WriteCallback) {
        {
            let mut state = self.state.borrow_mut();
            state.stats.writes += 1;
            let result = state.apply(collection, op);
            if result.is_ok() {
                state.fan_out(collection);
            }
            state.outbox.push_back(Delivery::Write { done, result });
        }
        self.flush_if_auto();
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal) || a == b
}

fn matches(filter: &Filter, doc: &Document) -> bool {
    // Documents missing the filtered field never match, whatever the operator.
    let Some(field) = doc.get(&filter.field) else {
        return false;
    };
    let ordering = compare_values(field, &filter.value);
    match filter.op {
        FilterOp::Eq => equal(field, &filter.value),
        FilterOp::NotEq => !equal(field, &filter.value),
        FilterOp::Lt => ordering == Some(Ordering::Less),
        FilterOp::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Gt => ordering == Some(Ordering::Greater),
        FilterOp::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::In => filter
            .value
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|candidate| equal(field, candidate))),
        FilterOp::ArrayContains => field
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equal(item, &filter.value))),
    }
}

fn evaluate(query: &QuerySpec, docs: Vec<Document>) -> Vec<Document> {
    let mut rows: Vec<Document> = docs
        .into_iter()
        .filter(|doc| query.filters.iter().all(|filter| matches(filter, doc)))
        .collect();
    if let Some(order) = &query.order_by {
        rows.retain(|doc| doc.get(&order.field).is_some());
        rows.sort_by(|a, b| {
            let ordering = match (a.get(&order.field), b.get(&order.field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        });
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    rows
}
