//! File-backed snapshot store.
//!
//! # File Layout
//!
//! ```text
//! <root>/<owner>/<repo>/
//!   issue.<number>.json
//!   pull_request.<number>.json
//!   resource.<number>.json
//! ```
//!
//! # Atomic Writes
//!
//! Every value is written using a write-to-temp-then-rename pattern:
//! 1. Write to a fresh temp file in the same directory
//! 2. fsync the file
//! 3. Rename to `<file>.json`
//! 4. fsync the directory
//!
//! Readers always see either the old or the new value, never a partial write.
//! Each save gets its own temp file, so concurrent saves of one key race only
//! on the final rename and the last one wins.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::trace;

use super::{Snapshot, SnapshotStore, StoreError};
use crate::types::EntityKey;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk envelope around a stored value.
#[derive(Debug, Serialize, Deserialize)]
struct StoredValue<T> {
    schema_version: u32,

    /// When the value was written.
    saved_at: DateTime<Utc>,

    value: T,
}

/// A [`SnapshotStore`] keeping one JSON file per value under a root directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonFileStore { root: root.into() }
    }

    /// Returns the file that holds the `kind` value for `key`.
    pub fn path_for(&self, kind: &str, key: &EntityKey) -> Result<PathBuf, StoreError> {
        validate_path_component(key.owner())?;
        validate_path_component(key.repo_name())?;
        Ok(self
            .root
            .join(key.owner())
            .join(key.repo_name())
            .join(format!("{}.{}.json", kind, key.number)))
    }
}

impl SnapshotStore for JsonFileStore {
    async fn get<T: Snapshot>(&self, key: &EntityKey) -> Result<Option<T>, StoreError> {
        let path = self.path_for(T::KIND, key)?;
        let bytes = tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
        .map_err(io::Error::other)??;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let stored: StoredValue<T> = serde_json::from_slice(&bytes)?;
        if stored.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: stored.schema_version,
            });
        }
        Ok(Some(stored.value))
    }

    async fn save<T: Snapshot>(&self, value: &T) -> Result<(), StoreError> {
        let path = self.path_for(T::KIND, value.key())?;
        let bytes = serde_json::to_vec_pretty(&StoredValue {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            value,
        })?;

        trace!(path = %path.display(), "Saving snapshot");
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(io::Error::other)??;
        Ok(())
    }
}

/// Rejects owner/repo names that would escape the store root.
fn validate_path_component(component: &str) -> Result<(), StoreError> {
    let invalid = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidKey(component.to_string()));
    }
    Ok(())
}

/// Writes `bytes` to `path` atomically, creating parent directories.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "snapshot path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Without a directory fsync the rename itself may not survive a crash.
    File::open(parent)?.sync_all()?;
    Ok(())
}
