//! HTTP handlers for the accounting period lifecycle

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::period::{
    CreatePeriodInput, Period, PeriodDetail, PeriodItemPrice, PeriodLocation, PeriodService, PeriodTransition,
    SetPricesInput,
};
use crate::AppState;

fn service(state: AppState) -> PeriodService {
    let timeout = state.transaction_timeout();
    PeriodService::new(state.db, state.authorizer, state.events, timeout)
}

pub async fn create_period(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreatePeriodInput>,
) -> AppResult<(StatusCode, Json<Period>)> {
    let period = service(state).create(&current_user.0, input).await?;
    Ok((StatusCode::CREATED, Json(period)))
}

pub async fn open_period(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<PeriodDetail>> {
    let period = service(state).open(&current_user.0, period_id).await?;
    Ok(Json(period))
}

/// Mark a location's reconciliation as ready for close
pub async fn mark_location_ready(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((period_id, location_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<PeriodLocation>> {
    let location = service(state)
        .mark_location_ready(&current_user.0, period_id, location_id)
        .await?;
    Ok(Json(location))
}

pub async fn request_period_close(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<PeriodTransition>> {
    let transition = service(state).request_close(&current_user.0, period_id).await?;
    Ok(Json(transition))
}

pub async fn close_period(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<PeriodTransition>> {
    let transition = service(state).close(&current_user.0, period_id).await?;
    Ok(Json(transition))
}

/// Lock reference prices for price-variance checks
pub async fn set_period_prices(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(period_id): Path<Uuid>,
    Json(input): Json<SetPricesInput>,
) -> AppResult<Json<Vec<PeriodItemPrice>>> {
    let prices = service(state).set_prices(&current_user.0, period_id, input).await?;
    Ok(Json(prices))
}

pub async fn get_period(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<PeriodDetail>> {
    let period = service(state).get(period_id).await?;
    Ok(Json(period))
}

pub async fn list_periods(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<Vec<Period>>> {
    let periods = service(state).list().await?;
    Ok(Json(periods))
}
