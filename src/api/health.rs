use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the state store answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let stored = state.store.list().await?.len();
    Ok(Json(serde_json::json!({
        "status": "ready",
        "monitored": state.config.entities.len(),
        "stored": stored,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
