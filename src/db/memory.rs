//! In-process entity state store.

use super::{EntityStateStore, StoreError};
use crate::domain::{EntityKey, EntityState, TimeMs};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// Non-durable store for tests and dry runs.
///
/// Individual keys can be made to fail on read or write to exercise the
/// monitor's store-error handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<BTreeMap<EntityKey, EntityState>>,
    failing_gets: HashSet<EntityKey>,
    failing_puts: HashSet<EntityKey>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_get(mut self, key: EntityKey) -> Self {
        self.failing_gets.insert(key);
        self
    }

    pub fn with_failing_put(mut self, key: EntityKey) -> Self {
        self.failing_puts.insert(key);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<EntityKey, EntityState>>, StoreError> {
        self.states
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl EntityStateStore for MemoryStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<EntityState>, StoreError> {
        if self.failing_gets.contains(key) {
            return Err(StoreError::Unavailable(format!("get {}", key)));
        }
        Ok(self.lock()?.get(key).cloned())
    }

    async fn put(&self, key: &EntityKey, state: &EntityState) -> Result<(), StoreError> {
        if self.failing_puts.contains(key) {
            return Err(StoreError::Unavailable(format!("put {}", key)));
        }
        self.lock()?.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(EntityKey, EntityState)>, StoreError> {
        Ok(self
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn prune_older_than(&self, cutoff: TimeMs) -> Result<u64, StoreError> {
        let mut states = self.lock()?;
        let before = states.len();
        states.retain(|_, state| state.updated_at >= cutoff);
        Ok((before - states.len()) as u64)
    }
}
