pub mod entities;
pub mod health;

use crate::config::Config;
use crate::db::EntityStateStore;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStateStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStateStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/entities", get(entities::list_entities))
        .route("/v1/entities/:key", get(entities::get_entity))
        .layer(cors)
        .with_state(state)
}
