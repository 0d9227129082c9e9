//! HTTP handlers for period-end reconciliation

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::reconciliation::{
    ConsolidatedQuery, ReconciliationService, ReconciliationView, SaveReconciliationInput,
};
use crate::AppState;

fn service(state: AppState) -> ReconciliationService {
    let timeout = state.transaction_timeout();
    ReconciliationService::new(state.db, state.authorizer, timeout)
}

/// Save (confirm) a location's reconciliation
pub async fn save_reconciliation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<SaveReconciliationInput>,
) -> AppResult<Json<ReconciliationView>> {
    let view = service(state).save(&current_user.0, input).await?;
    Ok(Json(view))
}

/// Saved or auto-calculated reconciliation for one location
pub async fn get_reconciliation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((period_id, location_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ReconciliationView>> {
    let view = service(state).get(&current_user.0, period_id, location_id).await?;
    Ok(Json(view))
}

/// All locations of a period, as JSON or CSV
pub async fn get_consolidated_reconciliation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ConsolidatedQuery>,
) -> AppResult<impl IntoResponse> {
    let data = service(state).consolidated(&current_user.0, query.period_id).await?;

    if query.format.as_deref() == Some("csv") {
        let csv = ReconciliationService::export_to_csv(&data.locations)?;
        Ok((
            [
                (header::CONTENT_TYPE, "text/csv"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"reconciliation.csv\""),
            ],
            csv,
        )
            .into_response())
    } else {
        Ok(Json(data).into_response())
    }
}
