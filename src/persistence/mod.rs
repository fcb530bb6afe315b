//! Snapshot persistence.
//!
//! The reconciler stores the last-known state of every issue and pull
//! request it has seen, plus one [`ResourceRecord`] per pull request that
//! ever requested a test environment. Storage is keyed by [`EntityKey`]
//! and by the kind of value, so an issue and a record for the same number
//! never collide.
//!
//! # Implementations
//!
//! - [`JsonFileStore`]: one JSON file per value, written atomically
//! - [`MemoryStore`]: in-process map, for tests and dry runs

use std::future::Future;
use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::types::{EntityKey, Issue, PullRequest, ResourceRecord};

pub mod file;
pub mod memory;

pub use file::{JsonFileStore, SCHEMA_VERSION};
pub use memory::MemoryStore;

/// Errors that can occur in a snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// The key cannot be mapped to storage (e.g., path traversal attempt).
    #[error("invalid key component: {0:?}")]
    InvalidKey(String),

    /// The backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A value that can be stored per entity.
pub trait Snapshot: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Distinguishes value kinds stored under the same entity key.
    const KIND: &'static str;

    fn key(&self) -> &EntityKey;
}

impl Snapshot for Issue {
    const KIND: &'static str = "issue";

    fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Snapshot for PullRequest {
    const KIND: &'static str = "pull_request";

    fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Snapshot for ResourceRecord {
    const KIND: &'static str = "resource";

    fn key(&self) -> &EntityKey {
        &self.key
    }
}

/// Keyed get/save of the last-known value per entity.
///
/// Saving fully replaces any previous value of the same kind and key.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Returns the stored value, or `None` if nothing was saved for the key.
    fn get<T: Snapshot>(
        &self,
        key: &EntityKey,
    ) -> impl Future<Output = Result<Option<T>, StoreError>> + Send;

    fn save<T: Snapshot>(&self, value: &T) -> impl Future<Output = Result<(), StoreError>> + Send;
}
