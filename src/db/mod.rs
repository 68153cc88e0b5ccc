//! Durable entity state.
//!
//! This module provides:
//! - The `EntityStateStore` key-value contract used by the monitor
//! - SQLite initialization, pragmas and migrations
//! - `Repository`, the SQLite-backed store
//! - `MemoryStore`, an in-process store for tests

pub mod memory;
pub mod migrations;
pub mod repo;

pub use memory::MemoryStore;
pub use migrations::init_db;
pub use repo::Repository;

use crate::domain::{EntityKey, EntityState, TimeMs};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("corrupt state for {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Per-key durable mapping from entity to its last known state.
///
/// `put` replaces the whole state atomically and is durable when it returns;
/// a later `get` in the same process sees it.
#[async_trait]
pub trait EntityStateStore: Send + Sync {
    async fn get(&self, key: &EntityKey) -> Result<Option<EntityState>, StoreError>;

    async fn put(&self, key: &EntityKey, state: &EntityState) -> Result<(), StoreError>;

    /// All stored states ordered by key.
    async fn list(&self) -> Result<Vec<(EntityKey, EntityState)>, StoreError>;

    /// Delete states not updated since `cutoff`; returns how many went.
    async fn prune_older_than(&self, cutoff: TimeMs) -> Result<u64, StoreError>;
}
