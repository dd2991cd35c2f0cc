//! The shared service object pages receive: one mode switch, one error
//! ledger, and one subscription manager per application.

use std::rc::Rc;

use crate::backend::Backend;
use crate::binding::{DataBinding, FallbackDataset};
use crate::classify::ErrorClassifier;
use crate::ledger::ErrorLedger;
use crate::mode::ModeController;
use crate::store::{DurableStore, FileStore};
use crate::subscription::SubscriptionManager;
use crate::types::{BindingOptions, DataMode, Entity, QuerySpec, SyncConfig};
use crate::Result;

/// Cheap to clone; clones share every service.
#[derive(Clone)]
pub struct SyncContext {
    mode: ModeController,
    ledger: Rc<ErrorLedger>,
    subscriptions: Rc<SubscriptionManager>,
    classifier: ErrorClassifier,
    config: Rc<SyncConfig>,
}

impl SyncContext {
    pub fn new(backend: Rc<dyn Backend>, store: Rc<dyn DurableStore>, config: SyncConfig) -> Self {
        let mode = ModeController::from_config(Rc::clone(&store), &config);
        let ledger = ErrorLedger::new(store, config.ledger_key.clone());
        tracing::debug!(
            target: "fieldsync::binding",
            mode = mode.get().label(),
            ledger_entries = ledger.len(),
            "sync context ready"
        );
        Self {
            mode,
            ledger: Rc::new(ledger),
            subscriptions: Rc::new(SubscriptionManager::new(backend)),
            classifier: ErrorClassifier::new(),
            config: Rc::new(config),
        }
    }

    /// Context persisting to a [`FileStore`] under the configured directory.
    pub fn with_file_store(backend: Rc<dyn Backend>, config: SyncConfig) -> Result<Self> {
        let store = FileStore::from_config(&config)?;
        Ok(Self::new(backend, Rc::new(store), config))
    }

    /// Mount a binding for `query`, served from `fallback` while in fallback mode.
    pub fn bind<T: Entity>(
        &self,
        query: QuerySpec,
        fallback: FallbackDataset<T>,
        options: BindingOptions,
    ) -> DataBinding<T> {
        DataBinding::mount(self, query, fallback, options)
    }

    #[must_use]
    pub fn mode(&self) -> &ModeController {
        &self.mode
    }

    /// Shorthand for `mode().set(..)`, for the global toggle.
    pub fn set_mode(&self, mode: DataMode) {
        self.mode.set(mode);
    }

    #[must_use]
    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    #[must_use]
    pub fn classifier(&self) -> ErrorClassifier {
        self.classifier
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Links for the remediation banner, first-seen order.
    #[must_use]
    pub fn remediation_links(&self) -> Vec<String> {
        self.ledger.list()
    }

    /// Forget recorded remediation links once the indexes exist.
    pub fn reset_remediation(&self) {
        self.ledger.clear();
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("mode", &self.mode)
            .field("ledger", &self.ledger)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::store::MemoryStore;
    use crate::types::Task;
    use tempfile::tempdir;

    #[test]
    fn clones_share_mode_and_ledger() {
        let ctx = SyncContext::new(
            Rc::new(InMemoryBackend::new()),
            Rc::new(MemoryStore::new()),
            SyncConfig::default(),
        );
        let other = ctx.clone();
        other.set_mode(DataMode::Live);
        assert!(ctx.mode().is_live());
        other.ledger().add("https://console/indexes?create=1");
        assert_eq!(ctx.remediation_links(), vec!["https://console/indexes?create=1"]);
        ctx.reset_remediation();
        assert!(other.ledger().is_empty());
    }

    #[test]
    fn file_backed_context_restores_mode_and_links() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::builder().store_dir(dir.path()).build();
        {
            let ctx =
                SyncContext::with_file_store(Rc::new(InMemoryBackend::new()), config.clone())
                    .unwrap();
            ctx.set_mode(DataMode::Live);
            ctx.ledger().add("https://console/indexes?create=abc");
        }
        let ctx = SyncContext::with_file_store(Rc::new(InMemoryBackend::new()), config).unwrap();
        assert_eq!(ctx.mode().get(), DataMode::Live);
        assert_eq!(ctx.remediation_links(), vec!["https://console/indexes?create=abc"]);
    }

    #[test]
    fn bind_uses_fallback_by_default() {
        let ctx = SyncContext::new(
            Rc::new(InMemoryBackend::new()),
            Rc::new(MemoryStore::new()),
            SyncConfig::default(),
        );
        let binding: DataBinding<Task> = ctx.bind(
            QuerySpec::collection(Task::COLLECTION),
            FallbackDataset::empty(),
            BindingOptions::default(),
        );
        assert_eq!(binding.view().mode, DataMode::Fallback);
        assert_eq!(ctx.subscriptions().total_active(), 0);
    }
}
