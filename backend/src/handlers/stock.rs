//! HTTP handlers for ledger postings and stock reads

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::delivery::{DeliveryDetail, DeliveryService, PostDeliveryInput};
use crate::services::issue::{IssueDetail, IssueService, PostIssueInput};
use crate::services::ledger::{LocationStock, StockService};
use crate::AppState;

/// Post a delivery into a location
pub async fn post_delivery(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<PostDeliveryInput>,
) -> AppResult<(StatusCode, Json<DeliveryDetail>)> {
    let timeout = state.transaction_timeout();
    let service = DeliveryService::new(state.db, state.authorizer, state.events, timeout);
    let delivery = service.post(&current_user.0, input).await?;
    Ok((StatusCode::CREATED, Json(delivery)))
}

/// Issue stock out of a location
pub async fn post_issue(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<PostIssueInput>,
) -> AppResult<(StatusCode, Json<IssueDetail>)> {
    let timeout = state.transaction_timeout();
    let service = IssueService::new(state.db, state.authorizer, timeout);
    let issue = service.post(&current_user.0, input).await?;
    Ok((StatusCode::CREATED, Json(issue)))
}

/// Current stock and value at a location
pub async fn get_location_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(location_id): Path<Uuid>,
) -> AppResult<Json<LocationStock>> {
    let service = StockService::new(state.db, state.authorizer);
    let stock = service.get_location_stock(&current_user.0, location_id).await?;
    Ok(Json(stock))
}
