//! Monitored entities and the search criteria derived from them.

use crate::domain::EntityKey;
use serde::{Deserialize, Serialize};

/// Something the monitor watches: a single product or a free-text category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MonitoredEntity {
    /// Product article number.
    Article(u64),
    /// Category name as written in the configuration.
    Category(String),
}

impl MonitoredEntity {
    /// Stable key under which the entity's state is persisted.
    ///
    /// Category names are trimmed and lowercased so cosmetic edits to the
    /// configuration do not orphan existing state.
    pub fn key(&self) -> EntityKey {
        match self {
            MonitoredEntity::Article(article) => EntityKey::new(format!("article:{}", article)),
            MonitoredEntity::Category(name) => {
                EntityKey::new(format!("category:{}", name.trim().to_lowercase()))
            }
        }
    }
}

impl std::fmt::Display for MonitoredEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitoredEntity::Article(article) => write!(f, "article {}", article),
            MonitoredEntity::Category(name) => write!(f, "category \"{}\"", name),
        }
    }
}

/// Concrete search parameter sent to the listing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ResolvedCriterion {
    Article(u64),
    Subcategory(u64),
}

impl std::fmt::Display for ResolvedCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedCriterion::Article(article) => write!(f, "article={}", article),
            ResolvedCriterion::Subcategory(id) => write!(f, "subcategory={}", id),
        }
    }
}

/// One entry of the marketplace category catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: u64,
    pub name: String,
    /// Routing hints used by the listing adapter; absent in test catalogs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl CatalogEntry {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            shard: None,
            query: None,
        }
    }
}
