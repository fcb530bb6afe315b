//! In-memory snapshot store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{Snapshot, SnapshotStore, StoreError};
use crate::types::EntityKey;

/// A [`SnapshotStore`] backed by a map of JSON values.
///
/// Values go through serde so that a round trip behaves like a real store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(&'static str, EntityKey), serde_json::Value>>,
    saves: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far, across all kinds.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(&'static str, EntityKey), serde_json::Value>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotStore for MemoryStore {
    async fn get<T: Snapshot>(&self, key: &EntityKey) -> Result<Option<T>, StoreError> {
        self.check_available()?;
        let value = self.lock().get(&(T::KIND, key.clone())).cloned();
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Snapshot>(&self, value: &T) -> Result<(), StoreError> {
        self.check_available()?;
        let json = serde_json::to_value(value)?;
        self.lock().insert((T::KIND, value.key().clone()), json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
