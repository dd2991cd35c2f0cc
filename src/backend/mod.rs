//! Document-store collaborator consumed by the subscription manager.
//!
//! The trait mirrors the hosted backend's three primitives: a live listener
//! (stream of full result sets plus an error channel), a one-shot query, and a
//! write. All calls are callback-driven and single-threaded; a backend may
//! deliver synchronously from inside the call or later from its own loop.

mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::{BackendStats, InMemoryBackend};

use crate::types::{Document, QuerySpec};

/// Status codes reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorCode {
    FailedPrecondition,
    PermissionDenied,
    NotFound,
    Unavailable,
    DeadlineExceeded,
    Internal,
    Unknown,
}

impl BackendErrorCode {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::FailedPrecondition => "failed-precondition",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw error value handed over by the backend. Classification reads `message`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, Eq, PartialEq)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new<S: Into<String>>(code: BackendErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Mutation accepted by [`Backend::write`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Create a document with a backend-generated id.
    Insert { fields: Map<String, Value> },
    /// Merge `fields` into an existing document.
    Update {
        id: String,
        fields: Map<String, Value>,
    },
    Delete { id: String },
}

/// Acknowledgement for a completed write.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct WriteAck {
    pub id: String,
}

pub type SnapshotCallback = Box<dyn FnMut(Vec<Document>)>;
pub type ErrorCallback = Box<dyn FnMut(BackendError)>;
pub type QueryCallback = Box<dyn FnOnce(Result<Vec<Document>, BackendError>)>;
pub type WriteCallback = Box<dyn FnOnce(Result<WriteAck, BackendError>)>;
/// Detaches a live listener. Called at most once.
pub type Unsubscribe = Box<dyn FnOnce()>;

pub trait Backend {
    /// Open a live listener. `on_next` receives the complete current result set
    /// on every change; `on_error` receives a terminal error after which no
    /// further snapshots arrive.
    fn subscribe(
        &self,
        query: &QuerySpec,
        on_next: SnapshotCallback,
        on_error: ErrorCallback,
    ) -> Unsubscribe;

    /// One-shot read. No cancellation: callers must ignore late resolutions.
    fn query(&self, query: &QuerySpec, done: QueryCallback);

    fn write(&self, collection: &str, op: WriteOp, done: WriteCallback);
}
