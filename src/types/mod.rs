//! Public types exposed by the `fieldsync-core` crate.

pub mod document;
pub mod mode;
pub mod options;
pub mod query;

pub use document::{Device, Document, Entity, Record, Task, TaskStatus, WeatherSample};
pub use mode::DataMode;
pub use options::{BindingOptions, FetchStrategy, SyncConfig, SyncConfigBuilder};
pub use query::{BindingKey, Direction, Filter, FilterOp, OrderBy, QuerySpec};
