use crate::api::AppState;
use crate::domain::{EntityKey, EntityState, TimeMs};
use crate::error::AppError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesQuery {
    /// Hide stored states of entities no longer in the configuration.
    pub monitored_only: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesResponse {
    pub entities: Vec<EntityStateDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStateDto {
    pub key: String,
    pub monitored: bool,
    pub last_spp: Option<u32>,
    pub last_determined_at: Option<i64>,
    pub last_error_at: Option<i64>,
    pub last_error_message: Option<String>,
    pub last_error_notified_at: Option<i64>,
    pub last_change_notified_at: Option<i64>,
    pub consecutive_indeterminate: u32,
    pub updated_at: i64,
}

impl EntityStateDto {
    fn new(key: EntityKey, state: EntityState, monitored: bool) -> Self {
        let ms = |t: Option<TimeMs>| t.map(|t| t.as_ms());
        Self {
            key: key.0,
            monitored,
            last_spp: state.last_spp,
            last_determined_at: ms(state.last_determined_at),
            last_error_at: ms(state.last_error_at),
            last_error_message: state.last_error_message,
            last_error_notified_at: ms(state.last_error_notified_at),
            last_change_notified_at: ms(state.last_change_notified_at),
            consecutive_indeterminate: state.consecutive_indeterminate,
            updated_at: state.updated_at.as_ms(),
        }
    }
}

fn monitored_keys(state: &AppState) -> HashSet<EntityKey> {
    state.config.entities.iter().map(|e| e.key()).collect()
}

pub async fn list_entities(
    Query(params): Query<EntitiesQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntitiesResponse>, AppError> {
    let monitored = monitored_keys(&state);
    let monitored_only = params.monitored_only.unwrap_or(false);

    let entities = state
        .store
        .list()
        .await?
        .into_iter()
        .map(|(key, entity_state)| {
            let is_monitored = monitored.contains(&key);
            EntityStateDto::new(key, entity_state, is_monitored)
        })
        .filter(|dto| !monitored_only || dto.monitored)
        .collect();

    Ok(Json(EntitiesResponse { entities }))
}

pub async fn get_entity(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<EntityStateDto>, AppError> {
    if key.trim().is_empty() {
        return Err(AppError::BadRequest("Entity key must not be empty".into()));
    }
    let key = EntityKey::new(key);
    let monitored = monitored_keys(&state).contains(&key);

    match state.store.get(&key).await? {
        Some(entity_state) => Ok(Json(EntityStateDto::new(key, entity_state, monitored))),
        None => Err(AppError::NotFound(format!("No state for {}", key))),
    }
}
