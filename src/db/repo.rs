//! SQLite-backed entity state repository.

use super::{EntityStateStore, StoreError};
use crate::domain::{EntityKey, EntityState, TimeMs};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

const SELECT_COLUMNS: &str = r#"
    SELECT entity_key, last_spp, last_determined_at, last_error_at, last_error_message,
           last_error_notified_at, last_change_notified_at, consecutive_indeterminate, updated_at
    FROM entity_state
"#;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }
}

fn state_from_row(row: &SqliteRow) -> Result<(EntityKey, EntityState), StoreError> {
    let key: String = row.get("entity_key");
    let time = |column: &str| row.get::<Option<i64>, _>(column).map(TimeMs::new);

    let last_spp = row
        .get::<Option<i64>, _>("last_spp")
        .map(u32::try_from)
        .transpose()
        .map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: format!("last_spp: {}", e),
        })?;
    let consecutive_indeterminate = u32::try_from(row.get::<i64, _>("consecutive_indeterminate"))
        .map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: format!("consecutive_indeterminate: {}", e),
        })?;

    let state = EntityState {
        last_spp,
        last_determined_at: time("last_determined_at"),
        last_error_at: time("last_error_at"),
        last_error_message: row.get("last_error_message"),
        last_error_notified_at: time("last_error_notified_at"),
        last_change_notified_at: time("last_change_notified_at"),
        consecutive_indeterminate,
        updated_at: TimeMs::new(row.get("updated_at")),
    };
    Ok((EntityKey::new(key), state))
}

#[async_trait]
impl EntityStateStore for Repository {
    async fn get(&self, key: &EntityKey) -> Result<Option<EntityState>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE entity_key = ?", SELECT_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(state_from_row)
            .transpose()
            .map(|found| found.map(|(_, state)| state))
    }

    /// Single-statement upsert, so each put is all-or-nothing.
    async fn put(&self, key: &EntityKey, state: &EntityState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO entity_state (
                entity_key, last_spp, last_determined_at, last_error_at, last_error_message,
                last_error_notified_at, last_change_notified_at, consecutive_indeterminate,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_key) DO UPDATE SET
                last_spp = excluded.last_spp,
                last_determined_at = excluded.last_determined_at,
                last_error_at = excluded.last_error_at,
                last_error_message = excluded.last_error_message,
                last_error_notified_at = excluded.last_error_notified_at,
                last_change_notified_at = excluded.last_change_notified_at,
                consecutive_indeterminate = excluded.consecutive_indeterminate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.as_str())
        .bind(state.last_spp.map(i64::from))
        .bind(state.last_determined_at.map(|t| t.as_ms()))
        .bind(state.last_error_at.map(|t| t.as_ms()))
        .bind(state.last_error_message.as_deref())
        .bind(state.last_error_notified_at.map(|t| t.as_ms()))
        .bind(state.last_change_notified_at.map(|t| t.as_ms()))
        .bind(i64::from(state.consecutive_indeterminate))
        .bind(state.updated_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<(EntityKey, EntityState)>, StoreError> {
        let rows = sqlx::query(&format!("{} ORDER BY entity_key ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn prune_older_than(&self, cutoff: TimeMs) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM entity_state WHERE updated_at < ?")
            .bind(cutoff.as_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
