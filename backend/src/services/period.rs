//! Accounting period lifecycle, per-location close readiness and roll-forward

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    find_duplicate_item, locations_not_ready, round_unit_cost, CloseWarning, DateRange,
    LocationReadiness, PeriodStatus,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::authz::{Action, Authorizer, Resource};
use crate::db::{begin_bounded, with_deadline};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::ledger;
use crate::services::notification::{DomainEvent, EventPublisher};

#[derive(Clone)]
pub struct PeriodService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
    events: EventPublisher,
    timeout: Duration,
}

/// Accounting period
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Period {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: PeriodStatus,
    pub opened_at: Option<DateTime<Utc>>,
    pub close_requested_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Period {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// One location's standing within a period
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PeriodLocation {
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub location_name: String,
    pub is_ready: bool,
    pub ready_at: Option<DateTime<Utc>>,
    pub ready_by: Option<Uuid>,
    pub opening_value: Option<Decimal>,
    pub closing_value: Option<Decimal>,
}

/// Period with its locations
#[derive(Debug, Clone, Serialize)]
pub struct PeriodDetail {
    #[serde(flatten)]
    pub period: Period,
    pub locations: Vec<PeriodLocation>,
}

/// Result of a close request or a close
#[derive(Debug, Clone, Serialize)]
pub struct PeriodTransition {
    pub period: Period,
    pub warnings: Vec<CloseWarning>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PeriodItemPrice {
    pub period_id: Uuid,
    pub item_id: Uuid,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePeriodInput {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ItemPriceInput {
    pub item_id: Uuid,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SetPricesInput {
    pub prices: Vec<ItemPriceInput>,
}

#[derive(Debug, FromRow)]
struct OpenNcrCount {
    location_id: Uuid,
    open_count: i64,
}

#[derive(Debug, FromRow)]
struct CloseSnapshotRow {
    location_id: Uuid,
    opening_value: Option<Decimal>,
    rec_opening: Option<Decimal>,
    rec_closing: Option<Decimal>,
}

const PERIOD_COLUMNS: &str = "id, name, start_date, end_date, status, opened_at, close_requested_at, \
                              closed_at, closed_by, created_by, created_at";

/// Lock a period against closing for the rest of the transaction and make
/// sure it still accepts mutations.
pub async fn lock_open_period(conn: &mut PgConnection, period_id: Uuid) -> AppResult<Period> {
    let period = sqlx::query_as::<_, Period>(&format!(
        "SELECT {} FROM periods WHERE id = $1 FOR SHARE",
        PERIOD_COLUMNS
    ))
    .bind(period_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Period"))?;

    ensure_accepts_mutations(&period)?;
    Ok(period)
}

fn ensure_accepts_mutations(period: &Period) -> AppResult<()> {
    match period.status {
        PeriodStatus::Open => Ok(()),
        PeriodStatus::Closed => Err(AppError::PeriodClosed(period.id)),
        other => Err(AppError::PeriodNotOpen {
            period_id: period.id,
            status: other.to_string(),
        }),
    }
}

/// Read a period without locking it
pub async fn fetch_period(conn: &mut PgConnection, period_id: Uuid) -> AppResult<Period> {
    sqlx::query_as::<_, Period>(&format!("SELECT {} FROM periods WHERE id = $1", PERIOD_COLUMNS))
        .bind(period_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Period"))
}

fn overlap_error() -> AppError {
    AppError::validation("start_date", "Period overlaps an existing period")
}

async fn lock_period_exclusive(conn: &mut PgConnection, period_id: Uuid) -> AppResult<Period> {
    sqlx::query_as::<_, Period>(&format!(
        "SELECT {} FROM periods WHERE id = $1 FOR UPDATE",
        PERIOD_COLUMNS
    ))
    .bind(period_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Period"))
}

impl PeriodService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>, events: EventPublisher, timeout: Duration) -> Self {
        Self {
            db,
            authorizer,
            events,
            timeout,
        }
    }

    /// Create a DRAFT period; periods may not overlap
    pub async fn create(&self, user: &AuthUser, input: CreatePeriodInput) -> AppResult<Period> {
        self.authorizer.require(user, Action::ManagePeriod, Resource::Any)?;
        input.validate()?;
        if input.start_date > input.end_date {
            return Err(AppError::validation("end_date", "end_date must not precede start_date"));
        }

        let period = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;

            // Serializes concurrent creates
            sqlx::query("LOCK TABLE periods IN SHARE ROW EXCLUSIVE MODE")
                .execute(&mut *tx)
                .await?;

            let overlapping = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM periods WHERE start_date <= $2 AND end_date >= $1",
            )
            .bind(input.start_date)
            .bind(input.end_date)
            .fetch_one(&mut *tx)
            .await?;

            if overlapping > 0 {
                return Err(overlap_error());
            }

            let period = sqlx::query_as::<_, Period>(&format!(
                r#"
                INSERT INTO periods (name, start_date, end_date, status, created_by)
                VALUES ($1, $2, $3, 'DRAFT', $4)
                RETURNING {}
                "#,
                PERIOD_COLUMNS
            ))
            .bind(input.name.trim())
            .bind(input.start_date)
            .bind(input.end_date)
            .bind(user.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| {
                let excluded = matches!(&err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23P01"));
                if excluded {
                    overlap_error()
                } else {
                    AppError::from(err)
                }
            })?;

            tx.commit().await?;
            Ok(period)
        })
        .await?;

        tracing::info!(period_id = %period.id, name = %period.name, "Period created");
        Ok(period)
    }

    /// DRAFT -> OPEN. Every active location joins the period, opening at the
    /// closing value it had at the end of the last closed period.
    pub async fn open(&self, user: &AuthUser, period_id: Uuid) -> AppResult<PeriodDetail> {
        self.authorizer.require(user, Action::ManagePeriod, Resource::Any)?;

        with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            let period = lock_period_exclusive(&mut tx, period_id).await?;
            period.status.advance_to(PeriodStatus::Open)?;

            sqlx::query(
                r#"
                INSERT INTO period_locations (period_id, location_id, opening_value)
                SELECT $1, l.id, (
                    SELECT pl.closing_value
                    FROM period_locations pl
                    JOIN periods p ON p.id = pl.period_id
                    WHERE pl.location_id = l.id AND p.status = 'CLOSED' AND p.end_date < $2
                    ORDER BY p.end_date DESC
                    LIMIT 1
                )
                FROM locations l
                WHERE l.is_active
                ON CONFLICT (period_id, location_id) DO NOTHING
                "#,
            )
            .bind(period_id)
            .bind(period.start_date)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE periods SET status = 'OPEN', opened_at = NOW() WHERE id = $1")
                .bind(period_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await?;

        tracing::info!(period_id = %period_id, "Period opened");
        self.get(period_id).await
    }

    /// Mark one location ready to close. Its reconciliation must have been
    /// saved; an auto-calculated figure is not enough.
    pub async fn mark_location_ready(
        &self,
        user: &AuthUser,
        period_id: Uuid,
        location_id: Uuid,
    ) -> AppResult<PeriodLocation> {
        self.authorizer
            .require(user, Action::MarkLocationReady, Resource::Location(location_id))?;

        let row = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            lock_open_period(&mut tx, period_id).await?;

            let confirmed = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM reconciliations WHERE period_id = $1 AND location_id = $2)",
            )
            .bind(period_id)
            .bind(location_id)
            .fetch_one(&mut *tx)
            .await?;

            if !confirmed {
                return Err(AppError::ReconciliationNotConfirmed(location_id));
            }

            let updated = sqlx::query(
                r#"
                UPDATE period_locations
                SET is_ready = TRUE, ready_at = NOW(), ready_by = $3
                WHERE period_id = $1 AND location_id = $2
                "#,
            )
            .bind(period_id)
            .bind(location_id)
            .bind(user.user_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(AppError::not_found("Period location"));
            }

            let row = fetch_period_location(&mut tx, period_id, location_id).await?;
            tx.commit().await?;
            Ok(row)
        })
        .await?;

        tracing::info!(period_id = %period_id, location_id = %location_id, "Location marked ready");
        Ok(row)
    }

    /// OPEN -> PENDING_CLOSE once every location is ready. Open NCRs come
    /// back as warnings.
    pub async fn request_close(&self, user: &AuthUser, period_id: Uuid) -> AppResult<PeriodTransition> {
        self.authorizer.require(user, Action::ManagePeriod, Resource::Any)?;

        let transition = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            let period = lock_period_exclusive(&mut tx, period_id).await?;
            period.status.advance_to(PeriodStatus::PendingClose)?;

            let readiness: Vec<LocationReadiness> = sqlx::query_as::<_, (Uuid, bool)>(
                "SELECT location_id, is_ready FROM period_locations WHERE period_id = $1 ORDER BY location_id",
            )
            .bind(period_id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|(location_id, is_ready)| LocationReadiness { location_id, is_ready })
            .collect();

            let pending = locations_not_ready(&readiness);
            if !pending.is_empty() {
                return Err(AppError::LocationsNotReady(pending));
            }

            let warnings = open_ncr_warnings(&mut tx, period_id).await?;

            let period = sqlx::query_as::<_, Period>(&format!(
                "UPDATE periods SET status = 'PENDING_CLOSE', close_requested_at = NOW() WHERE id = $1 RETURNING {}",
                PERIOD_COLUMNS
            ))
            .bind(period_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(PeriodTransition { period, warnings })
        })
        .await?;

        tracing::info!(period_id = %period_id, warnings = transition.warnings.len(), "Period close requested");
        Ok(transition)
    }

    /// PENDING_CLOSE -> CLOSED: snapshot every location's opening and closing
    /// value and carry the closing value into the next period.
    pub async fn close(&self, user: &AuthUser, period_id: Uuid) -> AppResult<PeriodTransition> {
        self.authorizer.require(user, Action::ManagePeriod, Resource::Any)?;

        let (transition, locations) = with_deadline(self.timeout, self.close_in_tx(user, period_id)).await?;

        self.events.publish(DomainEvent::PeriodClosed { period_id, locations });
        tracing::info!(period_id = %period_id, locations, "Period closed");
        Ok(transition)
    }

    async fn close_in_tx(&self, user: &AuthUser, period_id: Uuid) -> AppResult<(PeriodTransition, usize)> {
        let mut tx = begin_bounded(&self.db, self.timeout).await?;
        let period = lock_period_exclusive(&mut tx, period_id).await?;
        period.status.advance_to(PeriodStatus::Closed)?;

        let snapshots = sqlx::query_as::<_, CloseSnapshotRow>(
            r#"
            SELECT pl.location_id, pl.opening_value,
                   r.opening_stock AS rec_opening, r.closing_stock AS rec_closing
            FROM period_locations pl
            LEFT JOIN reconciliations r
                ON r.period_id = pl.period_id AND r.location_id = pl.location_id
            WHERE pl.period_id = $1
            ORDER BY pl.location_id
            "#,
        )
        .bind(period_id)
        .fetch_all(&mut *tx)
        .await?;

        let next_period = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM periods
            WHERE start_date > $1 AND status <> 'CLOSED'
            ORDER BY start_date
            LIMIT 1
            "#,
        )
        .bind(period.end_date)
        .fetch_optional(&mut *tx)
        .await?;

        for snapshot in &snapshots {
            let opening = snapshot
                .rec_opening
                .or(snapshot.opening_value)
                .unwrap_or(Decimal::ZERO);
            let closing = match snapshot.rec_closing {
                Some(value) => value,
                None => ledger::location_value(&mut tx, snapshot.location_id).await?,
            };

            sqlx::query(
                r#"
                UPDATE period_locations
                SET opening_value = $3, closing_value = $4
                WHERE period_id = $1 AND location_id = $2
                "#,
            )
            .bind(period_id)
            .bind(snapshot.location_id)
            .bind(opening)
            .bind(closing)
            .execute(&mut *tx)
            .await?;

            if let Some(next_id) = next_period {
                sqlx::query(
                    r#"
                    INSERT INTO period_locations (period_id, location_id, opening_value)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (period_id, location_id)
                    DO UPDATE SET opening_value = EXCLUDED.opening_value
                    "#,
                )
                .bind(next_id)
                .bind(snapshot.location_id)
                .bind(closing)
                .execute(&mut *tx)
                .await?;
            }
        }

        let warnings = open_ncr_warnings(&mut tx, period_id).await?;

        let period = sqlx::query_as::<_, Period>(&format!(
            "UPDATE periods SET status = 'CLOSED', closed_at = NOW(), closed_by = $2 WHERE id = $1 RETURNING {}",
            PERIOD_COLUMNS
        ))
        .bind(period_id)
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((PeriodTransition { period, warnings }, snapshots.len()))
    }

    /// Lock the reference prices deliveries in this period are checked against
    pub async fn set_prices(
        &self,
        user: &AuthUser,
        period_id: Uuid,
        input: SetPricesInput,
    ) -> AppResult<Vec<PeriodItemPrice>> {
        self.authorizer.require(user, Action::ManagePeriod, Resource::Any)?;

        if input.prices.is_empty() {
            return Err(AppError::validation("prices", "At least one price is required"));
        }
        if let Some(item_id) = find_duplicate_item(input.prices.iter().map(|p| p.item_id)) {
            return Err(AppError::validation("prices", format!("Item {} is listed more than once", item_id)));
        }
        if input.prices.iter().any(|p| p.price < Decimal::ZERO) {
            return Err(AppError::validation("price", "Prices must not be negative"));
        }

        let saved = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            let period = lock_period_exclusive(&mut tx, period_id).await?;
            if !period.status.accepts_price_changes() {
                return Err(match period.status {
                    PeriodStatus::Closed => AppError::PeriodClosed(period_id),
                    other => AppError::PeriodNotOpen {
                        period_id,
                        status: other.to_string(),
                    },
                });
            }

            let mut saved = Vec::with_capacity(input.prices.len());
            for price in &input.prices {
                let row = sqlx::query_as::<_, PeriodItemPrice>(
                    r#"
                    INSERT INTO period_item_prices (period_id, item_id, price)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (period_id, item_id)
                    DO UPDATE SET price = EXCLUDED.price, updated_at = NOW()
                    RETURNING period_id, item_id, price, updated_at
                    "#,
                )
                .bind(period_id)
                .bind(price.item_id)
                .bind(round_unit_cost(price.price))
                .fetch_one(&mut *tx)
                .await?;
                saved.push(row);
            }

            tx.commit().await?;
            Ok(saved)
        })
        .await?;

        tracing::info!(period_id = %period_id, count = saved.len(), "Period prices set");
        Ok(saved)
    }

    pub async fn get(&self, period_id: Uuid) -> AppResult<PeriodDetail> {
        let mut conn = self.db.acquire().await?;
        let period = fetch_period(&mut conn, period_id).await?;

        let locations = sqlx::query_as::<_, PeriodLocation>(
            r#"
            SELECT pl.period_id, pl.location_id, l.name AS location_name, pl.is_ready,
                   pl.ready_at, pl.ready_by, pl.opening_value, pl.closing_value
            FROM period_locations pl
            JOIN locations l ON l.id = pl.location_id
            WHERE pl.period_id = $1
            ORDER BY l.name
            "#,
        )
        .bind(period_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(PeriodDetail { period, locations })
    }

    pub async fn list(&self) -> AppResult<Vec<Period>> {
        let periods = sqlx::query_as::<_, Period>(&format!(
            "SELECT {} FROM periods ORDER BY start_date DESC",
            PERIOD_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(periods)
    }
}

async fn fetch_period_location(
    conn: &mut PgConnection,
    period_id: Uuid,
    location_id: Uuid,
) -> AppResult<PeriodLocation> {
    sqlx::query_as::<_, PeriodLocation>(
        r#"
        SELECT pl.period_id, pl.location_id, l.name AS location_name, pl.is_ready,
               pl.ready_at, pl.ready_by, pl.opening_value, pl.closing_value
        FROM period_locations pl
        JOIN locations l ON l.id = pl.location_id
        WHERE pl.period_id = $1 AND pl.location_id = $2
        "#,
    )
    .bind(period_id)
    .bind(location_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Period location"))
}

async fn open_ncr_warnings(conn: &mut PgConnection, period_id: Uuid) -> AppResult<Vec<CloseWarning>> {
    let counts = sqlx::query_as::<_, OpenNcrCount>(
        r#"
        SELECT location_id, COUNT(*) AS open_count
        FROM ncrs
        WHERE period_id = $1 AND status = 'OPEN'
        GROUP BY location_id
        ORDER BY location_id
        "#,
    )
    .bind(period_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(counts
        .into_iter()
        .map(|c| CloseWarning::open_ncrs(c.location_id, c.open_count))
        .collect())
}
