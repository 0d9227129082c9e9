//! Stock Valuation & Period Reconciliation Engine
//!
//! Per-location stock ledger valued at weighted average cost, inter-location
//! transfers, non-conformance reports, period-end reconciliation and the
//! accounting period lifecycle, served over HTTP.

use axum::{routing::get, Router};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod authz;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

pub use config::Config;

use authz::Authorizer;
use services::EventPublisher;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub authorizer: Arc<dyn Authorizer>,
    pub events: EventPublisher,
}

impl AppState {
    pub fn transaction_timeout(&self) -> Duration {
        self.config.engine.transaction_timeout()
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> &'static str {
    "Stock Valuation Engine API v1"
}
