//! One-JSON-file-per-key store with atomic replacement.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use serde_json::Value;

use super::DurableStore;
use crate::constants::STORE_FILE_EXTENSION;
use crate::{Result, SyncConfig, SyncError};

/// Durable store backed by a directory of small JSON files.
///
/// Each write goes through a temp file and rename, so a crash mid-write leaves
/// either the previous value or the new one, never a torn file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the configured directory or the platform data dir.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config
            .resolved_store_dir()
            .map(Self::new)
            .ok_or_else(|| SyncError::StoreUnavailable {
                key: String::new(),
                reason: "no store directory configured and no platform data dir".into(),
            })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.{STORE_FILE_EXTENSION}"))
    }
}

impl DurableStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let raw = match fs_err::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        if !self.dir.exists() {
            log::debug!(
                target: "fieldsync::store",
                "creating store directory {}",
                self.dir.display()
            );
            fs_err::create_dir_all(&self.dir)?;
        }
        let mut file = AtomicWriteFile::open(self.path_for(key))?;
        file.write_all(&serde_json::to_vec_pretty(value)?)?;
        file.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs_err::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn missing_key_reads_as_none() {
        let dir = tempdir().expect("tmp");
        let store = FileStore::new(dir.path());
        assert_eq!(store.load("mode-flag").expect("load"), None);
    }

    #[test]
    fn save_creates_directory_and_round_trips() {
        let dir = tempdir().expect("tmp");
        let store = FileStore::new(dir.path().join("nested"));
        store
            .save("index-error-ledger", &json!(["https://a", "https://b"]))
            .expect("save");
        assert!(dir.path().join("nested/index-error-ledger.json").exists());
        assert_eq!(
            store.load("index-error-ledger").expect("load"),
            Some(json!(["https://a", "https://b"]))
        );
    }

    #[test]
    fn keys_are_sanitised_and_remove_is_idempotent() {
        let dir = tempdir().expect("tmp");
        let store = FileStore::new(dir.path());
        store.save("../escape/key", &json!(true)).expect("save");
        assert!(dir.path().join("___escape_key.json").exists());
        store.remove("../escape/key").expect("remove");
        store.remove("../escape/key").expect("remove twice");
        assert_eq!(store.load("../escape/key").expect("load"), None);
    }

    #[test]
    fn corrupt_file_surfaces_serde_error() {
        let dir = tempdir().expect("tmp");
        std::fs::write(dir.path().join("mode-flag.json"), b"{not json").expect("write");
        let store = FileStore::new(dir.path());
        assert!(matches!(store.load("mode-flag"), Err(SyncError::Serde(_))));
    }
}
