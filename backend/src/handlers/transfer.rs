//! HTTP handlers for the transfer workflow

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::transfer::{
    CreateTransferInput, RejectTransferInput, Transfer, TransferDetail, TransferFilter, TransferService,
};
use crate::AppState;

fn service(state: AppState) -> TransferService {
    let timeout = state.transaction_timeout();
    TransferService::new(state.db, state.authorizer, state.events, timeout)
}

/// Request a transfer (or save it as a draft)
pub async fn create_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateTransferInput>,
) -> AppResult<(StatusCode, Json<TransferDetail>)> {
    let transfer = service(state).create(&current_user.0, input).await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

/// Submit a draft for approval
pub async fn submit_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<TransferDetail>> {
    let transfer = service(state).submit(&current_user.0, transfer_id).await?;
    Ok(Json(transfer))
}

/// Approve a pending transfer; stock moves in the same step
pub async fn approve_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<TransferDetail>> {
    let transfer = service(state).approve(&current_user.0, transfer_id).await?;
    Ok(Json(transfer))
}

pub async fn reject_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(transfer_id): Path<Uuid>,
    Json(input): Json<RejectTransferInput>,
) -> AppResult<Json<Transfer>> {
    let transfer = service(state).reject(&current_user.0, transfer_id, input).await?;
    Ok(Json(transfer))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<TransferDetail>> {
    let transfer = service(state).get(&current_user.0, transfer_id).await?;
    Ok(Json(transfer))
}

pub async fn list_transfers(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<TransferFilter>,
) -> AppResult<Json<Vec<Transfer>>> {
    let transfers = service(state).list(&current_user.0, filter).await?;
    Ok(Json(transfers))
}
