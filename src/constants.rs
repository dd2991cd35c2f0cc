//! Persisted key names and defaults shared across components.

/// Durable-store key holding the live/fallback flag (`true` means fallback).
pub const MODE_FLAG_KEY: &str = "mode-flag";
/// Durable-store key holding the ordered array of remediation links.
pub const INDEX_ERROR_LEDGER_KEY: &str = "index-error-ledger";
/// Directory name used under the platform data dir by [`crate::FileStore`].
pub const STORE_DIR_NAME: &str = "fieldsync";
/// Extension for files written by [`crate::FileStore`].
pub const STORE_FILE_EXTENSION: &str = "json";
