//! HTTP handlers for non-conformance reports

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::NcrSummary;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::ncr::{CreateNcrInput, Ncr, NcrFilter, NcrService, NcrSummaryQuery, UpdateNcrStatusInput};
use crate::AppState;

fn service(state: AppState) -> NcrService {
    NcrService::new(state.db, state.authorizer, state.events, state.config.engine.clone())
}

/// Raise a manual NCR
pub async fn create_ncr(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateNcrInput>,
) -> AppResult<(StatusCode, Json<Ncr>)> {
    let ncr = service(state).create_manual(&current_user.0, input).await?;
    Ok((StatusCode::CREATED, Json(ncr)))
}

/// Move an NCR to CREDITED, REJECTED or RESOLVED
pub async fn update_ncr_status(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(ncr_id): Path<Uuid>,
    Json(input): Json<UpdateNcrStatusInput>,
) -> AppResult<Json<Ncr>> {
    let ncr = service(state).update_status(&current_user.0, ncr_id, input).await?;
    Ok(Json(ncr))
}

pub async fn get_ncr(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(ncr_id): Path<Uuid>,
) -> AppResult<Json<Ncr>> {
    let ncr = service(state).get(&current_user.0, ncr_id).await?;
    Ok(Json(ncr))
}

pub async fn list_ncrs(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<NcrFilter>,
) -> AppResult<Json<Vec<Ncr>>> {
    let ncrs = service(state).list(&current_user.0, filter).await?;
    Ok(Json(ncrs))
}

/// Credited, lost and pending totals for one location in one period
pub async fn get_ncr_summary(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<NcrSummaryQuery>,
) -> AppResult<Json<NcrSummary>> {
    let summary = service(state).summarize_for_period(&current_user.0, query).await?;
    Ok(Json(summary))
}
