//! Mode and remediation links survive a process restart on the file store.

use std::rc::Rc;

use fieldsync_core::{
    BackendError, BackendErrorCode, BindingOptions, DataBinding, DataMode, DurableStore,
    FallbackDataset, FileStore, InMemoryBackend, QuerySpec, SyncConfig, SyncContext, Task,
    INDEX_ERROR_LEDGER_KEY, MODE_FLAG_KEY,
};
use serde_json::json;
use tempfile::TempDir;

const TASK_INDEX_URL: &str =
    "https://console.firebase.google.com/project/farm-ops/firestore/indexes?create_composite=dGFza3M";

fn context(dir: &TempDir, backend: &InMemoryBackend) -> SyncContext {
    let config = SyncConfig::builder().store_dir(dir.path()).build();
    SyncContext::with_file_store(Rc::new(backend.clone()), config).unwrap()
}

#[test]
fn tripped_session_is_restored_after_restart() {
    let dir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    backend.fail_collection(
        Task::COLLECTION,
        BackendError::new(
            BackendErrorCode::FailedPrecondition,
            format!("The query requires an index. You can create it here: {TASK_INDEX_URL}."),
        ),
    );

    {
        let ctx = context(&dir, &backend);
        assert_eq!(ctx.mode().get(), DataMode::Fallback);
        ctx.set_mode(DataMode::Live);
        let binding: DataBinding<Task> = ctx.bind(
            QuerySpec::collection(Task::COLLECTION).order_by_asc("due"),
            FallbackDataset::empty(),
            BindingOptions::default(),
        );
        assert!(binding.view().has_errored);
    }

    let store = FileStore::new(dir.path());
    assert_eq!(store.load(MODE_FLAG_KEY).unwrap(), Some(json!(true)));
    assert_eq!(
        store.load(INDEX_ERROR_LEDGER_KEY).unwrap(),
        Some(json!([TASK_INDEX_URL]))
    );

    let restarted = context(&dir, &backend);
    assert_eq!(restarted.mode().get(), DataMode::Fallback);
    assert_eq!(restarted.remediation_links(), vec![TASK_INDEX_URL]);

    restarted.reset_remediation();
    assert_eq!(store.load(INDEX_ERROR_LEDGER_KEY).unwrap(), None);
}

#[test]
fn live_choice_is_remembered() {
    let dir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    context(&dir, &backend).set_mode(DataMode::Live);

    let ctx = context(&dir, &backend);
    assert_eq!(ctx.mode().get(), DataMode::Live);
    let binding: DataBinding<Task> = ctx.bind(
        QuerySpec::collection(Task::COLLECTION),
        FallbackDataset::empty(),
        BindingOptions::default(),
    );
    assert_eq!(backend.stats().subscribes, 1);
    assert!(binding.view().data.is_empty());
    assert!(!binding.view().loading);
}
