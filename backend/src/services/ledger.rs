//! Stock ledger: per-location, per-item quantity on hand and WAC
//!
//! Rows are only changed inside the transaction of the posting that moves
//! them, after being locked `FOR UPDATE`. Locks are always taken in
//! (location, item) order, and before the posting draws a document number,
//! so two postings over the same rows cannot deadlock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{StockLevel, CURRENCY_CODE};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::authz::{Action, Authorizer, Resource};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

/// Ledger row as stored
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockEntry {
    pub location_id: Uuid,
    pub item_id: Uuid,
    pub item_code: String,
    pub item_name: String,
    pub unit: String,
    pub on_hand: Decimal,
    pub wac: Decimal,
    pub last_counted: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger row with its value at current cost
#[derive(Debug, Clone, Serialize)]
pub struct StockValuation {
    #[serde(flatten)]
    pub entry: StockEntry,
    pub value: Decimal,
}

/// Stock position of a whole location
#[derive(Debug, Clone, Serialize)]
pub struct LocationStock {
    pub location_id: Uuid,
    pub items: Vec<StockValuation>,
    pub total_value: Decimal,
    pub currency: String,
}

#[derive(Debug, FromRow)]
struct LevelRow {
    item_id: Uuid,
    on_hand: Decimal,
    wac: Decimal,
}

/// Lock and read the ledger rows of `item_ids` at one location.
///
/// Missing rows are created empty first, so a first receipt locks a real row
/// like any later posting does. Both statements run in item order. Unknown
/// items stay absent from the map, and rows created for a posting that then
/// fails go away with its rollback.
pub async fn lock_levels(
    conn: &mut PgConnection,
    location_id: Uuid,
    item_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, StockLevel>> {
    let mut ordered = item_ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    sqlx::query(
        r#"
        INSERT INTO stock (location_id, item_id, on_hand, wac)
        SELECT l.id, i.id, 0, 0
        FROM locations l
        CROSS JOIN items i
        WHERE l.id = $1 AND i.id = ANY($2)
        ORDER BY i.id
        ON CONFLICT (location_id, item_id) DO NOTHING
        "#,
    )
    .bind(location_id)
    .bind(ordered.as_slice())
    .execute(&mut *conn)
    .await?;

    let rows = sqlx::query_as::<_, LevelRow>(
        r#"
        SELECT item_id, on_hand, wac
        FROM stock
        WHERE location_id = $1 AND item_id = ANY($2)
        ORDER BY item_id
        FOR UPDATE
        "#,
    )
    .bind(location_id)
    .bind(ordered.as_slice())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.item_id, StockLevel::new(r.on_hand, r.wac)))
        .collect())
}

/// Lock the same items at two locations, lower location id first
pub async fn lock_level_pair(
    conn: &mut PgConnection,
    first: Uuid,
    second: Uuid,
    item_ids: &[Uuid],
) -> AppResult<(HashMap<Uuid, StockLevel>, HashMap<Uuid, StockLevel>)> {
    if first <= second {
        let a = lock_levels(conn, first, item_ids).await?;
        let b = lock_levels(conn, second, item_ids).await?;
        Ok((a, b))
    } else {
        let b = lock_levels(conn, second, item_ids).await?;
        let a = lock_levels(conn, first, item_ids).await?;
        Ok((a, b))
    }
}

/// Store a level computed from a row locked by [`lock_levels`]
pub async fn write_level(
    conn: &mut PgConnection,
    location_id: Uuid,
    item_id: Uuid,
    level: StockLevel,
) -> AppResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE stock
        SET on_hand = $3, wac = $4, updated_at = NOW()
        WHERE location_id = $1 AND item_id = $2
        "#,
    )
    .bind(location_id)
    .bind(item_id)
    .bind(level.on_hand)
    .bind(level.wac)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("Stock row"));
    }
    Ok(())
}

/// Σ(on_hand × wac) over every item held at the location, as of now
pub async fn location_value(conn: &mut PgConnection, location_id: Uuid) -> AppResult<Decimal> {
    let value = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(ROUND(on_hand * wac, 2)), 0) FROM stock WHERE location_id = $1",
    )
    .bind(location_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(value)
}

/// Read-side access to the ledger
#[derive(Clone)]
pub struct StockService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
}

impl StockService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { db, authorizer }
    }

    /// Every ledger row at a location, valued at current WAC
    pub async fn get_location_stock(&self, user: &AuthUser, location_id: Uuid) -> AppResult<LocationStock> {
        self.authorizer
            .require(user, Action::ViewStock, Resource::Location(location_id))?;

        let entries = sqlx::query_as::<_, StockEntry>(
            r#"
            SELECT s.location_id, s.item_id, i.code AS item_code, i.name AS item_name, i.unit,
                   s.on_hand, s.wac, s.last_counted, s.updated_at
            FROM stock s
            JOIN items i ON i.id = s.item_id
            WHERE s.location_id = $1
            ORDER BY i.code
            "#,
        )
        .bind(location_id)
        .fetch_all(&self.db)
        .await?;

        let items: Vec<StockValuation> = entries
            .into_iter()
            .map(|entry| {
                let value = StockLevel::new(entry.on_hand, entry.wac).value();
                StockValuation { entry, value }
            })
            .collect();
        let total_value = items.iter().map(|i| i.value).sum();

        Ok(LocationStock {
            location_id,
            items,
            total_value,
            currency: CURRENCY_CODE.to_string(),
        })
    }
}
