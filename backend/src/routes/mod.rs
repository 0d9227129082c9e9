//! Route definitions for the Stock Valuation Engine

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Protected routes - ledger postings
        .nest("/deliveries", delivery_routes(state.clone()))
        .nest("/issues", issue_routes(state.clone()))
        .nest("/locations", location_routes(state.clone()))
        // Protected routes - transfer workflow
        .nest("/transfers", transfer_routes(state.clone()))
        // Protected routes - non-conformance reports
        .nest("/ncrs", ncr_routes(state.clone()))
        // Protected routes - period-end reconciliation
        .nest("/reconciliations", reconciliation_routes(state.clone()))
        // Protected routes - period lifecycle
        .nest("/periods", period_routes(state))
}

fn delivery_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::post_delivery))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

fn issue_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::post_issue))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

fn location_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:location_id/stock", get(handlers::get_location_stock))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Transfer routes (protected)
fn transfer_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_transfers).post(handlers::create_transfer))
        .route("/:transfer_id", get(handlers::get_transfer))
        .route("/:transfer_id/submit", patch(handlers::submit_transfer))
        .route("/:transfer_id/approve", patch(handlers::approve_transfer))
        .route("/:transfer_id/reject", patch(handlers::reject_transfer))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// NCR routes (protected)
fn ncr_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_ncrs).post(handlers::create_ncr))
        .route("/summary", get(handlers::get_ncr_summary))
        .route("/:ncr_id", get(handlers::get_ncr).patch(handlers::update_ncr_status))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Reconciliation routes (protected)
fn reconciliation_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::save_reconciliation))
        .route("/consolidated", get(handlers::get_consolidated_reconciliation))
        .route("/:period_id/:location_id", get(handlers::get_reconciliation))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Period lifecycle routes (protected)
fn period_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_periods).post(handlers::create_period))
        .route("/:period_id", get(handlers::get_period))
        .route("/:period_id/open", patch(handlers::open_period))
        .route("/:period_id/locations/:location_id/ready", patch(handlers::mark_location_ready))
        .route("/:period_id/request-close", patch(handlers::request_period_close))
        .route("/:period_id/close", patch(handlers::close_period))
        .route("/:period_id/prices", put(handlers::set_period_prices))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
