//! Builder-style configuration for a sync context and its bindings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::mode::DataMode;
use crate::constants::{INDEX_ERROR_LEDGER_KEY, MODE_FLAG_KEY, STORE_DIR_NAME};

fn default_mode_key() -> String {
    MODE_FLAG_KEY.to_string()
}

fn default_ledger_key() -> String {
    INDEX_ERROR_LEDGER_KEY.to_string()
}

/// Context-wide settings. Defaults match the persisted layout the dashboard
/// has always used, so existing durable state is picked up unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Mode used on cold start when nothing has been persisted yet.
    #[serde(default)]
    pub default_mode: DataMode,
    #[serde(default = "default_mode_key")]
    pub mode_key: String,
    #[serde(default = "default_ledger_key")]
    pub ledger_key: String,
    /// Directory for [`crate::FileStore`]; `None` means the platform data dir.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_mode: DataMode::default(),
            mode_key: default_mode_key(),
            ledger_key: default_ledger_key(),
            store_dir: None,
        }
    }
}

impl SyncConfig {
    /// Start a fluent builder for `SyncConfig`.
    #[must_use]
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Directory the file store should use, resolving the platform default.
    #[must_use]
    pub fn resolved_store_dir(&self) -> Option<PathBuf> {
        self.store_dir
            .clone()
            .or_else(|| dirs_next::data_local_dir().map(|dir| dir.join(STORE_DIR_NAME)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncConfigBuilder {
    inner: SyncConfig,
}

impl SyncConfigBuilder {
    #[must_use]
    pub fn default_mode(mut self, mode: DataMode) -> Self {
        self.inner.default_mode = mode;
        self
    }

    pub fn mode_key<S: Into<String>>(mut self, key: S) -> Self {
        self.inner.mode_key = key.into();
        self
    }

    pub fn ledger_key<S: Into<String>>(mut self, key: S) -> Self {
        self.inner.ledger_key = key.into();
        self
    }

    pub fn store_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.inner.store_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn build(self) -> SyncConfig {
        self.inner
    }
}

/// How a binding reads while in live mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Keep a live subscription open and re-render on every pushed snapshot.
    #[default]
    Subscribe,
    /// Issue a single one-shot query (reference and count lookups).
    Once,
}

/// Per-binding settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct BindingOptions {
    #[serde(default)]
    pub strategy: FetchStrategy,
}

impl BindingOptions {
    #[must_use]
    pub fn once() -> Self {
        Self {
            strategy: FetchStrategy::Once,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_persisted_layout() {
        let config = SyncConfig::default();
        assert_eq!(config.mode_key, "mode-flag");
        assert_eq!(config.ledger_key, "index-error-ledger");
        assert_eq!(config.default_mode, DataMode::Fallback);
    }

    #[test]
    fn builder_overrides_and_deserialize_fills_defaults() {
        let config = SyncConfig::builder()
            .default_mode(DataMode::Live)
            .store_dir("/tmp/fieldsync-test")
            .build();
        assert_eq!(config.default_mode, DataMode::Live);
        assert_eq!(
            config.resolved_store_dir(),
            Some(PathBuf::from("/tmp/fieldsync-test"))
        );

        let parsed: SyncConfig = serde_json::from_str(r#"{"default_mode":"live"}"#).unwrap();
        assert_eq!(parsed.default_mode, DataMode::Live);
        assert_eq!(parsed.ledger_key, "index-error-ledger");
    }
}
