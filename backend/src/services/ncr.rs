//! Non-conformance reports: creation, status workflow and period totals

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{round_money, DocumentKind, FinancialImpact, NcrStatus, NcrSummary, NcrType, Role};
use sqlx::{FromRow, PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::authz::{Action, Authorizer, Resource};
use crate::config::EngineConfig;
use crate::db::{begin_bounded, begin_snapshot, with_deadline};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::notification::{DomainEvent, EventPublisher};
use crate::services::period::lock_open_period;
use crate::services::sequence::next_document_number;

#[derive(Clone)]
pub struct NcrService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
    events: EventPublisher,
    engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ncr {
    pub id: Uuid,
    pub ncr_no: String,
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub ncr_type: NcrType,
    pub auto_generated: bool,
    pub delivery_id: Option<Uuid>,
    pub delivery_line_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
    pub reason: String,
    pub value: Decimal,
    pub status: NcrStatus,
    pub resolution_type: Option<String>,
    pub financial_impact: Option<FinancialImpact>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct NcrRow {
    id: Uuid,
    ncr_no: String,
    period_id: Uuid,
    location_id: Uuid,
    ncr_type: String,
    auto_generated: bool,
    delivery_id: Option<Uuid>,
    delivery_line_id: Option<Uuid>,
    item_id: Option<Uuid>,
    reason: String,
    value: Decimal,
    status: String,
    resolution_type: Option<String>,
    financial_impact: Option<String>,
    resolution_notes: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<Uuid>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NcrRow> for Ncr {
    type Error = AppError;

    fn try_from(row: NcrRow) -> Result<Self, Self::Error> {
        Ok(Ncr {
            id: row.id,
            ncr_no: row.ncr_no,
            period_id: row.period_id,
            location_id: row.location_id,
            ncr_type: row.ncr_type.parse()?,
            auto_generated: row.auto_generated,
            delivery_id: row.delivery_id,
            delivery_line_id: row.delivery_line_id,
            item_id: row.item_id,
            reason: row.reason,
            value: row.value,
            status: row.status.parse()?,
            resolution_type: row.resolution_type,
            financial_impact: row.financial_impact.map(|f| f.parse()).transpose()?,
            resolution_notes: row.resolution_notes,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNcrInput {
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub reason: String,
    pub value: Decimal,
    pub delivery_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNcrStatusInput {
    pub status: NcrStatus,
    pub financial_impact: Option<FinancialImpact>,
    pub resolution_type: Option<String>,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NcrFilter {
    pub period_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: Option<NcrStatus>,
}

#[derive(Debug, Deserialize)]
pub struct NcrSummaryQuery {
    pub period_id: Uuid,
    pub location_id: Uuid,
}

/// Auto-generated claim for one delivery line priced off the period price
#[derive(Debug, Clone)]
pub struct PriceVarianceNcr {
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub delivery_id: Uuid,
    pub delivery_line_id: Uuid,
    pub item_id: Uuid,
    pub reason: String,
    pub value: Decimal,
    pub created_by: Uuid,
}

const NCR_COLUMNS: &str = "id, ncr_no, period_id, location_id, ncr_type, auto_generated, delivery_id, \
                           delivery_line_id, item_id, reason, value, status, resolution_type, \
                           financial_impact, resolution_notes, resolved_at, resolved_by, created_by, \
                           created_at, updated_at";

impl Ncr {
    pub fn created_event(&self) -> DomainEvent {
        DomainEvent::NcrCreated {
            ncr_id: self.id,
            ncr_no: self.ncr_no.clone(),
            location_id: self.location_id,
            ncr_type: self.ncr_type,
            value: self.value,
            auto_generated: self.auto_generated,
        }
    }
}

/// Record a PRICE_VARIANCE NCR on the delivery's own transaction
pub async fn insert_price_variance_ncr(conn: &mut PgConnection, ncr: PriceVarianceNcr) -> AppResult<Ncr> {
    let ncr_no = next_document_number(&mut *conn, DocumentKind::Ncr).await?;

    let row = sqlx::query_as::<_, NcrRow>(&format!(
        r#"
        INSERT INTO ncrs (ncr_no, period_id, location_id, ncr_type, auto_generated, delivery_id,
                          delivery_line_id, item_id, reason, value, status, created_by)
        VALUES ($1, $2, $3, 'PRICE_VARIANCE', TRUE, $4, $5, $6, $7, $8, 'OPEN', $9)
        RETURNING {}
        "#,
        NCR_COLUMNS
    ))
    .bind(&ncr_no)
    .bind(ncr.period_id)
    .bind(ncr.location_id)
    .bind(ncr.delivery_id)
    .bind(ncr.delivery_line_id)
    .bind(ncr.item_id)
    .bind(&ncr.reason)
    .bind(round_money(ncr.value))
    .bind(ncr.created_by)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// NCR totals for one location and period, read on the caller's snapshot
pub async fn summarize(conn: &mut PgConnection, period_id: Uuid, location_id: Uuid) -> AppResult<NcrSummary> {
    let rows = sqlx::query_as::<_, (String, Option<String>, Decimal)>(
        "SELECT status, financial_impact, value FROM ncrs WHERE period_id = $1 AND location_id = $2",
    )
    .bind(period_id)
    .bind(location_id)
    .fetch_all(&mut *conn)
    .await?;

    let records = rows
        .into_iter()
        .map(|(status, impact, value)| -> AppResult<(NcrStatus, Option<FinancialImpact>, Decimal)> {
            let status = status.parse::<NcrStatus>()?;
            let impact = impact.map(|i| i.parse::<FinancialImpact>()).transpose()?;
            Ok((status, impact, value))
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(NcrSummary::from_records(records))
}

impl NcrService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>, events: EventPublisher, engine: EngineConfig) -> Self {
        Self {
            db,
            authorizer,
            events,
            engine,
        }
    }

    /// Raise a MANUAL NCR
    pub async fn create_manual(&self, user: &AuthUser, input: CreateNcrInput) -> AppResult<Ncr> {
        self.authorizer
            .require(user, Action::CreateNcr, Resource::Location(input.location_id))?;

        if input.reason.trim().is_empty() {
            return Err(AppError::validation("reason", "Reason is required"));
        }
        if input.value < Decimal::ZERO {
            return Err(AppError::validation("value", "Value must not be negative"));
        }

        let timeout = self.engine.transaction_timeout();
        let ncr = with_deadline(timeout, async {
            let mut tx = begin_bounded(&self.db, timeout).await?;
            lock_open_period(&mut tx, input.period_id).await?;

            if let Some(delivery_id) = input.delivery_id {
                let delivery_location = sqlx::query_scalar::<_, Uuid>("SELECT location_id FROM deliveries WHERE id = $1")
                    .bind(delivery_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| AppError::not_found("Delivery"))?;
                if delivery_location != input.location_id {
                    return Err(AppError::validation("delivery_id", "Delivery belongs to another location"));
                }
            }

            let ncr_no = next_document_number(&mut tx, DocumentKind::Ncr).await?;
            let row = sqlx::query_as::<_, NcrRow>(&format!(
                r#"
                INSERT INTO ncrs (ncr_no, period_id, location_id, ncr_type, auto_generated, delivery_id,
                                  item_id, reason, value, status, created_by)
                VALUES ($1, $2, $3, 'MANUAL', FALSE, $4, $5, $6, $7, 'OPEN', $8)
                RETURNING {}
                "#,
                NCR_COLUMNS
            ))
            .bind(&ncr_no)
            .bind(input.period_id)
            .bind(input.location_id)
            .bind(input.delivery_id)
            .bind(input.item_id)
            .bind(input.reason.trim())
            .bind(round_money(input.value))
            .bind(user.user_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ncr::try_from(row)
        })
        .await?;

        self.events.publish(ncr.created_event());
        tracing::info!(ncr_no = %ncr.ncr_no, location_id = %ncr.location_id, value = %ncr.value, "NCR created");
        Ok(ncr)
    }

    /// Move an OPEN NCR into a terminal state. `resolved_at` is stamped here
    /// and never again, since terminal states cannot be left.
    pub async fn update_status(&self, user: &AuthUser, ncr_id: Uuid, input: UpdateNcrStatusInput) -> AppResult<Ncr> {
        self.authorizer.require(user, Action::UpdateNcrStatus, Resource::Any)?;

        let timeout = self.engine.transaction_timeout();
        let (ncr, from) = with_deadline(timeout, async {
            let mut tx = begin_bounded(&self.db, timeout).await?;

            let current: Ncr =
                sqlx::query_as::<_, NcrRow>(&format!("SELECT {} FROM ncrs WHERE id = $1 FOR UPDATE", NCR_COLUMNS))
                    .bind(ncr_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| AppError::not_found("NCR"))?
                    .try_into()?;

            self.authorizer
                .require(user, Action::UpdateNcrStatus, Resource::Location(current.location_id))?;

            if self.engine.ncr_status_period_gated {
                lock_open_period(&mut tx, current.period_id).await?;
            }

            current
                .status
                .transition(input.status, input.financial_impact, input.resolution_type.as_deref())?;

            let financial_impact = input.financial_impact.or(match input.status {
                NcrStatus::Credited => Some(FinancialImpact::Credit),
                NcrStatus::Rejected => Some(FinancialImpact::Loss),
                _ => None,
            });

            let row = sqlx::query_as::<_, NcrRow>(&format!(
                r#"
                UPDATE ncrs
                SET status = $2,
                    financial_impact = $3,
                    resolution_type = $4,
                    resolution_notes = COALESCE($5, resolution_notes),
                    resolved_at = COALESCE(resolved_at, NOW()),
                    resolved_by = $6,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {}
                "#,
                NCR_COLUMNS
            ))
            .bind(ncr_id)
            .bind(input.status.as_str())
            .bind(financial_impact.map(|f| f.as_str()))
            .bind(input.resolution_type.as_deref().map(str::trim))
            .bind(input.resolution_notes.as_deref())
            .bind(user.user_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((Ncr::try_from(row)?, current.status))
        })
        .await?;

        tracing::info!(ncr_no = %ncr.ncr_no, from = %from, to = %ncr.status, "NCR status updated");
        Ok(ncr)
    }

    /// Credited, lost and pending totals plus the open count for one location
    pub async fn summarize_for_period(&self, user: &AuthUser, query: NcrSummaryQuery) -> AppResult<NcrSummary> {
        self.authorizer
            .require(user, Action::ViewNcr, Resource::Location(query.location_id))?;

        let mut tx = begin_snapshot(&self.db).await?;
        let summary = summarize(&mut tx, query.period_id, query.location_id).await?;
        tx.commit().await?;
        Ok(summary)
    }

    pub async fn get(&self, user: &AuthUser, ncr_id: Uuid) -> AppResult<Ncr> {
        let ncr: Ncr = sqlx::query_as::<_, NcrRow>(&format!("SELECT {} FROM ncrs WHERE id = $1", NCR_COLUMNS))
            .bind(ncr_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("NCR"))?
            .try_into()?;

        self.authorizer
            .require(user, Action::ViewNcr, Resource::Location(ncr.location_id))?;
        Ok(ncr)
    }

    /// NCRs visible to the caller, newest first
    pub async fn list(&self, user: &AuthUser, filter: NcrFilter) -> AppResult<Vec<Ncr>> {
        if let Some(location_id) = filter.location_id {
            self.authorizer
                .require(user, Action::ViewNcr, Resource::Location(location_id))?;
        } else {
            self.authorizer.require(user, Action::ViewNcr, Resource::Any)?;
        }

        // NULL means every location
        let scope: Option<Vec<Uuid>> = (user.role != Role::Admin).then(|| user.location_ids.clone());

        let rows = sqlx::query_as::<_, NcrRow>(&format!(
            r#"
            SELECT {}
            FROM ncrs
            WHERE ($1::uuid IS NULL OR period_id = $1)
              AND ($2::uuid IS NULL OR location_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid[] IS NULL OR location_id = ANY($4))
            ORDER BY created_at DESC
            "#,
            NCR_COLUMNS
        ))
        .bind(filter.period_id)
        .bind(filter.location_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(scope)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Ncr::try_from).collect()
    }
}
