#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::float_cmp,
        clippy::redundant_closure_for_method_calls
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing; public entry
// points carry docs where behaviour is not obvious from the signature.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Builders and callback registration take owned values on purpose.
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::must_use_candidate)]
//
// Pattern matching: these pedantic lints often reduce clarity in state machines.
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

/// The fieldsync-core crate version (matches `Cargo.toml`).
pub const FIELDSYNC_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backend;
pub mod binding;
pub mod classify;
pub mod constants;
pub mod context;
pub mod error;
pub mod ledger;
pub mod mode;
pub mod observer;
pub mod store;
pub mod subscription;
pub mod types;

pub use backend::{
    Backend, BackendError, BackendErrorCode, BackendStats, InMemoryBackend, WriteAck, WriteOp,
};
pub use binding::{BindingState, BindingView, DataBinding, DataSource, FallbackDataset};
pub use classify::{ErrorClass, ErrorClassifier, ErrorKind};
pub use constants::*;
pub use context::SyncContext;
pub use error::{Result, SyncError};
pub use ledger::ErrorLedger;
pub use mode::ModeController;
pub use observer::{Listeners, Subscription};
pub use store::{DurableStore, FileStore, MemoryStore};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
pub use types::{
    BindingKey, BindingOptions, DataMode, Device, Direction, Document, Entity, FetchStrategy,
    Filter, FilterOp, OrderBy, QuerySpec, Record, SyncConfig, SyncConfigBuilder, Task, TaskStatus,
    WeatherSample,
};
