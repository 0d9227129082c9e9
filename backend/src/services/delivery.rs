//! Delivery posting: receipts into the ledger at weighted average cost, with
//! price-variance NCRs raised against the period-locked price

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    check_variance, extend, find_duplicate_item, price_variance_reason, round_quantity, round_unit_cost,
    validate_positive_quantity, DocumentKind,
};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::authz::{Action, Authorizer, Resource};
use crate::db::{begin_bounded, with_deadline};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::ledger;
use crate::services::ncr::{insert_price_variance_ncr, Ncr, PriceVarianceNcr};
use crate::services::notification::{DomainEvent, EventPublisher};
use crate::services::period::lock_open_period;
use crate::services::sequence::next_document_number;

#[derive(Clone)]
pub struct DeliveryService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
    events: EventPublisher,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub delivery_no: String,
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub supplier_name: String,
    pub reference: Option<String>,
    pub delivery_date: NaiveDate,
    pub total_amount: Decimal,
    pub has_variance: bool,
    pub posted_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeliveryLine {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub period_price: Option<Decimal>,
    pub price_variance: Option<Decimal>,
    pub line_value: Decimal,
}

/// Posted delivery with the NCRs it raised
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryDetail {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub lines: Vec<DeliveryLine>,
    pub ncrs: Vec<Ncr>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PostDeliveryInput {
    pub period_id: Uuid,
    pub location_id: Uuid,
    #[validate(length(min = 1, max = 200, message = "supplier_name must be 1-200 characters"))]
    pub supplier_name: String,
    pub reference: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub lines: Vec<DeliveryLineInput>,
}

impl DeliveryService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>, events: EventPublisher, timeout: Duration) -> Self {
        Self {
            db,
            authorizer,
            events,
            timeout,
        }
    }

    /// Post a delivery. Every line is received at WAC; every line whose price
    /// differs from the period price gets exactly one PRICE_VARIANCE NCR.
    pub async fn post(&self, user: &AuthUser, input: PostDeliveryInput) -> AppResult<DeliveryDetail> {
        self.authorizer
            .require(user, Action::PostDelivery, Resource::Location(input.location_id))?;
        input.validate()?;

        if input.lines.is_empty() {
            return Err(AppError::validation("lines", "At least one line is required"));
        }
        for line in &input.lines {
            validate_positive_quantity(round_quantity(line.quantity))?;
            if line.unit_price < Decimal::ZERO {
                return Err(AppError::validation("unit_price", "Unit price must not be negative"));
            }
        }
        if let Some(item_id) = find_duplicate_item(input.lines.iter().map(|l| l.item_id)) {
            return Err(AppError::validation("lines", format!("Item {} is listed more than once", item_id)));
        }

        let detail = with_deadline(self.timeout, self.post_in_tx(user, &input)).await?;

        self.events
            .publish_all(detail.ncrs.iter().map(Ncr::created_event));
        self.events.publish(DomainEvent::DeliveryPosted {
            delivery_id: detail.delivery.id,
            delivery_no: detail.delivery.delivery_no.clone(),
            location_id: detail.delivery.location_id,
            total_amount: detail.delivery.total_amount,
            variance_ncrs: detail.ncrs.len(),
        });
        tracing::info!(
            delivery_no = %detail.delivery.delivery_no,
            total_amount = %detail.delivery.total_amount,
            variance_ncrs = detail.ncrs.len(),
            "Delivery posted"
        );
        Ok(detail)
    }

    async fn post_in_tx(&self, user: &AuthUser, input: &PostDeliveryInput) -> AppResult<DeliveryDetail> {
        let mut tx = begin_bounded(&self.db, self.timeout).await?;
        let period = lock_open_period(&mut tx, input.period_id).await?;

        let delivery_date = input.delivery_date.unwrap_or_else(|| Utc::now().date_naive());
        if !period.range().contains(delivery_date) {
            return Err(AppError::validation("delivery_date", "Delivery date falls outside the period"));
        }

        let item_ids: Vec<Uuid> = input.lines.iter().map(|l| l.item_id).collect();

        let item_names: HashMap<Uuid, String> =
            sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM items WHERE id = ANY($1)")
                .bind(&item_ids)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();
        if let Some(missing) = item_ids.iter().find(|id| !item_names.contains_key(id)) {
            return Err(AppError::not_found(format!("Item {}", missing)));
        }

        let period_prices: HashMap<Uuid, Decimal> = sqlx::query_as::<_, (Uuid, Decimal)>(
            "SELECT item_id, price FROM period_item_prices WHERE period_id = $1 AND item_id = ANY($2)",
        )
        .bind(input.period_id)
        .bind(&item_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let levels = ledger::lock_levels(&mut tx, input.location_id, &item_ids).await?;

        let total_amount: Decimal = input
            .lines
            .iter()
            .map(|l| extend(round_quantity(l.quantity), round_unit_cost(l.unit_price)))
            .sum();

        let delivery_no = next_document_number(&mut tx, DocumentKind::Delivery).await?;
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            INSERT INTO deliveries (delivery_no, period_id, location_id, supplier_name, reference,
                                    delivery_date, total_amount, has_variance, posted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            RETURNING id, delivery_no, period_id, location_id, supplier_name, reference,
                      delivery_date, total_amount, has_variance, posted_by, created_at
            "#,
        )
        .bind(&delivery_no)
        .bind(input.period_id)
        .bind(input.location_id)
        .bind(input.supplier_name.trim())
        .bind(input.reference.as_deref())
        .bind(delivery_date)
        .bind(total_amount)
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(input.lines.len());
        let mut ncrs = Vec::new();

        for line in &input.lines {
            let quantity = round_quantity(line.quantity);
            let unit_price = round_unit_cost(line.unit_price);
            let period_price = period_prices.get(&line.item_id).copied();
            let variance = period_price.map(|price| check_variance(unit_price, price, quantity));

            let current = levels.get(&line.item_id).copied().unwrap_or_default();
            let received = current.receive(quantity, unit_price)?;
            ledger::write_level(&mut tx, input.location_id, line.item_id, received).await?;

            let row = sqlx::query_as::<_, DeliveryLine>(
                r#"
                INSERT INTO delivery_lines (delivery_id, item_id, quantity, unit_price, period_price,
                                            price_variance, line_value)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, delivery_id, item_id, quantity, unit_price, period_price, price_variance, line_value
                "#,
            )
            .bind(delivery.id)
            .bind(line.item_id)
            .bind(quantity)
            .bind(unit_price)
            .bind(period_price)
            .bind(variance.as_ref().map(|v| v.variance))
            .bind(extend(quantity, unit_price))
            .fetch_one(&mut *tx)
            .await?;

            // Every priced line that differs raises one NCR, including one
            // whose amount rounds to 0.00 at money scale
            if let (Some(price), Some(result)) = (period_price, variance.filter(|v| v.has_variance)) {
                let item_name = item_names.get(&line.item_id).map(String::as_str).unwrap_or_default();
                let ncr = insert_price_variance_ncr(
                    &mut tx,
                    PriceVarianceNcr {
                        period_id: input.period_id,
                        location_id: input.location_id,
                        delivery_id: delivery.id,
                        delivery_line_id: row.id,
                        item_id: line.item_id,
                        reason: price_variance_reason(item_name, unit_price, price, &result),
                        value: result.ncr_value(),
                        created_by: user.user_id,
                    },
                )
                .await?;
                tracing::debug!(ncr_no = %ncr.ncr_no, item_id = %line.item_id, "Price variance NCR raised");
                ncrs.push(ncr);
            }

            lines.push(row);
        }

        let delivery = if ncrs.is_empty() {
            delivery
        } else {
            sqlx::query_as::<_, Delivery>(
                r#"
                UPDATE deliveries SET has_variance = TRUE WHERE id = $1
                RETURNING id, delivery_no, period_id, location_id, supplier_name, reference,
                          delivery_date, total_amount, has_variance, posted_by, created_at
                "#,
            )
            .bind(delivery.id)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(DeliveryDetail { delivery, lines, ncrs })
    }
}

