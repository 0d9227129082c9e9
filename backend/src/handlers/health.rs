//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub transaction_timeout_secs: u64,
}

/// Reports whether the ledger database is reachable
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => "connected",
        Err(err) => {
            tracing::warn!("Health check could not reach database: {}", err);
            "disconnected"
        }
    };

    Json(HealthResponse {
        status: if database == "connected" { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        transaction_timeout_secs: state.config.engine.transaction_timeout_secs,
    })
}
