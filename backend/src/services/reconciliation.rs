//! Period-end reconciliation per location
//!
//! A location's figures come either from its saved record or, until one is
//! saved, from an auto-calculation over the period's movements. All reads for
//! one answer happen on a single snapshot.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    calculate_consumption, calculate_manday_cost, round_money, ConsumptionBreakdown, ConsumptionInputs, Role,
    CURRENCY_CODE,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::authz::{Action, Authorizer, Resource};
use crate::db::{begin_bounded, begin_snapshot, with_deadline};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::period::{fetch_period, lock_open_period, Period};
use crate::services::{ledger, ncr};

#[derive(Clone)]
pub struct ReconciliationService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
    timeout: Duration,
}

/// The eleven monetary inputs of a reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReconciliationFigures {
    pub opening_stock: Decimal,
    pub receipts: Decimal,
    pub transfers_in: Decimal,
    pub transfers_out: Decimal,
    pub closing_stock: Decimal,
    pub adjustments: Decimal,
    pub back_charges: Decimal,
    pub credits: Decimal,
    pub condemnations: Decimal,
    pub ncr_credits: Decimal,
    pub ncr_losses: Decimal,
}

impl ReconciliationFigures {
    fn consumption_inputs(&self) -> ConsumptionInputs {
        ConsumptionInputs {
            opening_stock: self.opening_stock,
            receipts: self.receipts,
            transfers_in: self.transfers_in,
            transfers_out: self.transfers_out,
            closing_stock: self.closing_stock,
            back_charges: self.back_charges,
            credits: self.credits,
            condemnations: self.condemnations,
            adjustments: self.adjustments,
            ncr_credits: self.ncr_credits,
            ncr_losses: self.ncr_losses,
        }
    }
}

#[derive(Debug, FromRow)]
struct SavedReconciliation {
    #[sqlx(flatten)]
    figures: ReconciliationFigures,
    total_mandays: Option<i32>,
    updated_at: DateTime<Utc>,
}

/// A location's reconciliation with everything derived from it
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationView {
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub is_auto_calculated: bool,
    #[serde(flatten)]
    pub figures: ReconciliationFigures,
    pub total_mandays: Option<i32>,
    pub total_adjustments: Decimal,
    pub consumption: Decimal,
    pub breakdown: ConsumptionBreakdown,
    pub manday_cost: Option<Decimal>,
    pub open_ncr_count: i64,
    pub saved_at: Option<DateTime<Utc>>,
    pub currency: String,
}

/// Input for saving (confirming) a reconciliation. Figures left out keep
/// their auto-calculated value.
#[derive(Debug, Default, Deserialize)]
pub struct SaveReconciliationInput {
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub opening_stock: Option<Decimal>,
    pub receipts: Option<Decimal>,
    pub transfers_in: Option<Decimal>,
    pub transfers_out: Option<Decimal>,
    pub closing_stock: Option<Decimal>,
    pub adjustments: Option<Decimal>,
    pub back_charges: Option<Decimal>,
    pub credits: Option<Decimal>,
    pub condemnations: Option<Decimal>,
    pub ncr_credits: Option<Decimal>,
    pub ncr_losses: Option<Decimal>,
    pub total_mandays: Option<i32>,
}

impl SaveReconciliationInput {
    /// Overlay the entered figures on the calculated ones
    pub fn merge(&self, auto: ReconciliationFigures) -> ReconciliationFigures {
        let pick = |entered: Option<Decimal>, calculated: Decimal| round_money(entered.unwrap_or(calculated));
        ReconciliationFigures {
            opening_stock: pick(self.opening_stock, auto.opening_stock),
            receipts: pick(self.receipts, auto.receipts),
            transfers_in: pick(self.transfers_in, auto.transfers_in),
            transfers_out: pick(self.transfers_out, auto.transfers_out),
            closing_stock: pick(self.closing_stock, auto.closing_stock),
            adjustments: pick(self.adjustments, auto.adjustments),
            back_charges: pick(self.back_charges, auto.back_charges),
            credits: pick(self.credits, auto.credits),
            condemnations: pick(self.condemnations, auto.condemnations),
            ncr_credits: pick(self.ncr_credits, auto.ncr_credits),
            ncr_losses: pick(self.ncr_losses, auto.ncr_losses),
        }
    }
}

/// One row of the consolidated view, flat for CSV export
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedRow {
    pub location_id: Uuid,
    pub location_name: String,
    pub is_auto_calculated: bool,
    pub opening_stock: Decimal,
    pub receipts: Decimal,
    pub transfers_in: Decimal,
    pub transfers_out: Decimal,
    pub closing_stock: Decimal,
    pub total_adjustments: Decimal,
    pub consumption: Decimal,
    pub total_mandays: Option<i32>,
    pub manday_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidatedTotals {
    pub opening_stock: Decimal,
    pub receipts: Decimal,
    pub transfers_in: Decimal,
    pub transfers_out: Decimal,
    pub closing_stock: Decimal,
    pub total_adjustments: Decimal,
    pub consumption: Decimal,
    pub total_mandays: i64,
    pub manday_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedReconciliation {
    pub period_id: Uuid,
    pub period_name: String,
    pub locations: Vec<ConsolidatedRow>,
    pub totals: ConsolidatedTotals,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsolidatedQuery {
    pub period_id: Uuid,
    pub format: Option<String>,
}

impl ConsolidatedTotals {
    pub fn from_rows(rows: &[ConsolidatedRow]) -> AppResult<Self> {
        let mut totals = rows.iter().fold(ConsolidatedTotals::default(), |mut t, row| {
            t.opening_stock += row.opening_stock;
            t.receipts += row.receipts;
            t.transfers_in += row.transfers_in;
            t.transfers_out += row.transfers_out;
            t.closing_stock += row.closing_stock;
            t.total_adjustments += row.total_adjustments;
            t.consumption += row.consumption;
            t.total_mandays += i64::from(row.total_mandays.unwrap_or(0));
            t
        });
        if totals.total_mandays > 0 {
            totals.manday_cost = Some(calculate_manday_cost(totals.consumption, Decimal::from(totals.total_mandays))?);
        }
        Ok(totals)
    }
}

fn build_view(
    period_id: Uuid,
    location_id: Uuid,
    figures: ReconciliationFigures,
    total_mandays: Option<i32>,
    saved_at: Option<DateTime<Utc>>,
    open_ncr_count: i64,
) -> AppResult<ReconciliationView> {
    let result = calculate_consumption(&figures.consumption_inputs());
    let manday_cost = total_mandays
        .map(|m| calculate_manday_cost(result.consumption, Decimal::from(m)))
        .transpose()?;

    Ok(ReconciliationView {
        period_id,
        location_id,
        is_auto_calculated: saved_at.is_none(),
        figures,
        total_mandays,
        total_adjustments: result.total_adjustments,
        consumption: result.consumption,
        breakdown: result.breakdown,
        manday_cost,
        open_ncr_count,
        saved_at,
        currency: CURRENCY_CODE.to_string(),
    })
}

async fn fetch_saved(
    conn: &mut PgConnection,
    period_id: Uuid,
    location_id: Uuid,
) -> AppResult<Option<SavedReconciliation>> {
    let saved = sqlx::query_as::<_, SavedReconciliation>(
        r#"
        SELECT opening_stock, receipts, transfers_in, transfers_out, closing_stock, adjustments,
               back_charges, credits, condemnations, ncr_credits, ncr_losses, total_mandays, updated_at
        FROM reconciliations
        WHERE period_id = $1 AND location_id = $2
        "#,
    )
    .bind(period_id)
    .bind(location_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(saved)
}

/// Opening value the location carried into the period: the rolled-forward
/// snapshot if there is one, else the latest earlier reconciliation's closing
/// stock, else zero.
async fn opening_value(conn: &mut PgConnection, period: &Period, location_id: Uuid) -> AppResult<Decimal> {
    let rolled_forward = sqlx::query_scalar::<_, Option<Decimal>>(
        "SELECT opening_value FROM period_locations WHERE period_id = $1 AND location_id = $2",
    )
    .bind(period.id)
    .bind(location_id)
    .fetch_optional(&mut *conn)
    .await?
    .flatten();

    if let Some(value) = rolled_forward {
        return Ok(value);
    }

    let previous = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT r.closing_stock
        FROM reconciliations r
        JOIN periods p ON p.id = r.period_id
        WHERE r.location_id = $1 AND p.end_date < $2
        ORDER BY p.end_date DESC
        LIMIT 1
        "#,
    )
    .bind(location_id)
    .bind(period.start_date)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(previous.unwrap_or(Decimal::ZERO))
}

async fn sum_transfers(
    conn: &mut PgConnection,
    column: &'static str,
    location_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<Decimal> {
    let total = sqlx::query_scalar::<_, Decimal>(&format!(
        r#"
        SELECT COALESCE(SUM(total_value), 0)
        FROM transfers
        WHERE status = 'COMPLETED' AND {} = $1
          AND transfer_date::date BETWEEN $2 AND $3
        "#,
        column
    ))
    .bind(location_id)
    .bind(start)
    .bind(end)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

/// Figures derived from the period's movements and the ledger as of now
pub async fn auto_calculate(
    conn: &mut PgConnection,
    period: &Period,
    location_id: Uuid,
) -> AppResult<(ReconciliationFigures, i64)> {
    let opening_stock = opening_value(conn, period, location_id).await?;

    let receipts = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(total_amount), 0) FROM deliveries WHERE period_id = $1 AND location_id = $2",
    )
    .bind(period.id)
    .bind(location_id)
    .fetch_one(&mut *conn)
    .await?;

    let transfers_in = sum_transfers(conn, "to_location_id", location_id, period.start_date, period.end_date).await?;
    let transfers_out =
        sum_transfers(conn, "from_location_id", location_id, period.start_date, period.end_date).await?;
    let closing_stock = ledger::location_value(conn, location_id).await?;
    let ncr_summary = ncr::summarize(conn, period.id, location_id).await?;

    let figures = ReconciliationFigures {
        opening_stock: round_money(opening_stock),
        receipts: round_money(receipts),
        transfers_in: round_money(transfers_in),
        transfers_out: round_money(transfers_out),
        closing_stock: round_money(closing_stock),
        ncr_credits: round_money(ncr_summary.credited_total),
        ncr_losses: round_money(ncr_summary.loss_total),
        ..ReconciliationFigures::default()
    };
    Ok((figures, ncr_summary.open_count))
}

async fn location_view(conn: &mut PgConnection, period: &Period, location_id: Uuid) -> AppResult<ReconciliationView> {
    match fetch_saved(conn, period.id, location_id).await? {
        Some(saved) => {
            let open_ncr_count = ncr::summarize(conn, period.id, location_id).await?.open_count;
            build_view(
                period.id,
                location_id,
                saved.figures,
                saved.total_mandays,
                Some(saved.updated_at),
                open_ncr_count,
            )
        }
        None => {
            let (figures, open_ncr_count) = auto_calculate(conn, period, location_id).await?;
            build_view(period.id, location_id, figures, None, None, open_ncr_count)
        }
    }
}

impl ReconciliationService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>, timeout: Duration) -> Self {
        Self { db, authorizer, timeout }
    }

    /// Saved reconciliation, or an auto-calculated one if none is saved yet
    pub async fn get(&self, user: &AuthUser, period_id: Uuid, location_id: Uuid) -> AppResult<ReconciliationView> {
        self.authorizer
            .require(user, Action::ViewReconciliation, Resource::Location(location_id))?;

        let mut tx = begin_snapshot(&self.db).await?;
        let period = fetch_period(&mut tx, period_id).await?;
        let view = location_view(&mut tx, &period, location_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    /// Upsert (confirm) a location's reconciliation. Only an OPEN period
    /// accepts this; a CLOSED one fails with PERIOD_CLOSED.
    pub async fn save(&self, user: &AuthUser, input: SaveReconciliationInput) -> AppResult<ReconciliationView> {
        self.authorizer
            .require(user, Action::SaveReconciliation, Resource::Location(input.location_id))?;

        if let Some(mandays) = input.total_mandays {
            if mandays <= 0 {
                return Err(AppError::InvalidMandayCount(format!(
                    "total mandays must be positive, got {}",
                    mandays
                )));
            }
        }

        let view = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            let period = lock_open_period(&mut tx, input.period_id).await?;

            let (auto, open_ncr_count) = auto_calculate(&mut tx, &period, input.location_id).await?;
            let figures = input.merge(auto);

            let saved_at = sqlx::query_scalar::<_, DateTime<Utc>>(
                r#"
                INSERT INTO reconciliations (period_id, location_id, opening_stock, receipts, transfers_in,
                                             transfers_out, closing_stock, adjustments, back_charges, credits,
                                             condemnations, ncr_credits, ncr_losses, total_mandays, saved_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (period_id, location_id) DO UPDATE SET
                    opening_stock = EXCLUDED.opening_stock,
                    receipts = EXCLUDED.receipts,
                    transfers_in = EXCLUDED.transfers_in,
                    transfers_out = EXCLUDED.transfers_out,
                    closing_stock = EXCLUDED.closing_stock,
                    adjustments = EXCLUDED.adjustments,
                    back_charges = EXCLUDED.back_charges,
                    credits = EXCLUDED.credits,
                    condemnations = EXCLUDED.condemnations,
                    ncr_credits = EXCLUDED.ncr_credits,
                    ncr_losses = EXCLUDED.ncr_losses,
                    total_mandays = EXCLUDED.total_mandays,
                    saved_by = EXCLUDED.saved_by,
                    updated_at = NOW()
                RETURNING updated_at
                "#,
            )
            .bind(input.period_id)
            .bind(input.location_id)
            .bind(figures.opening_stock)
            .bind(figures.receipts)
            .bind(figures.transfers_in)
            .bind(figures.transfers_out)
            .bind(figures.closing_stock)
            .bind(figures.adjustments)
            .bind(figures.back_charges)
            .bind(figures.credits)
            .bind(figures.condemnations)
            .bind(figures.ncr_credits)
            .bind(figures.ncr_losses)
            .bind(input.total_mandays)
            .bind(user.user_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            build_view(
                input.period_id,
                input.location_id,
                figures,
                input.total_mandays,
                Some(saved_at),
                open_ncr_count,
            )
        })
        .await?;

        tracing::info!(
            period_id = %view.period_id,
            location_id = %view.location_id,
            consumption = %view.consumption,
            "Reconciliation saved"
        );
        Ok(view)
    }

    /// Every location of the period the caller can see, with period totals
    pub async fn consolidated(&self, user: &AuthUser, period_id: Uuid) -> AppResult<ConsolidatedReconciliation> {
        self.authorizer
            .require(user, Action::ViewReconciliation, Resource::Any)?;

        let scope: Option<Vec<Uuid>> = (user.role != Role::Admin).then(|| user.location_ids.clone());

        let mut tx = begin_snapshot(&self.db).await?;
        let period = fetch_period(&mut tx, period_id).await?;

        let locations = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT l.id, l.name
            FROM period_locations pl
            JOIN locations l ON l.id = pl.location_id
            WHERE pl.period_id = $1
              AND ($2::uuid[] IS NULL OR l.id = ANY($2))
            ORDER BY l.name
            "#,
        )
        .bind(period_id)
        .bind(scope)
        .fetch_all(&mut *tx)
        .await?;

        let mut rows = Vec::with_capacity(locations.len());
        for (location_id, location_name) in locations {
            let view = location_view(&mut tx, &period, location_id).await?;
            rows.push(ConsolidatedRow {
                location_id,
                location_name,
                is_auto_calculated: view.is_auto_calculated,
                opening_stock: view.figures.opening_stock,
                receipts: view.figures.receipts,
                transfers_in: view.figures.transfers_in,
                transfers_out: view.figures.transfers_out,
                closing_stock: view.figures.closing_stock,
                total_adjustments: view.total_adjustments,
                consumption: view.consumption,
                total_mandays: view.total_mandays,
                manday_cost: view.manday_cost,
            });
        }
        tx.commit().await?;

        let totals = ConsolidatedTotals::from_rows(&rows)?;
        Ok(ConsolidatedReconciliation {
            period_id,
            period_name: period.name,
            locations: rows,
            totals,
            currency: CURRENCY_CODE.to_string(),
        })
    }

    /// Render consolidated rows as CSV
    pub fn export_to_csv(rows: &[ConsolidatedRow]) -> AppResult<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for row in rows {
            wtr.serialize(row)
                .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
    }
}
