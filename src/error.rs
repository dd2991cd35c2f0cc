use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the synchronization layer.
///
/// Nothing on the binding data path returns these to page code; they flow out of
/// the store, decode, and backend plumbing and are either absorbed (logged) or
/// mapped into a [`crate::BindingView`] error field.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("durable store unavailable for key `{key}`: {reason}")]
    StoreUnavailable { key: String, reason: String },

    #[error("stored value for key `{key}` has unexpected shape: {reason}")]
    InvalidStoredValue { key: String, reason: String },

    #[error("invalid `{collection}` document `{id}`: {reason}")]
    InvalidDocument {
        collection: String,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
