//! Inter-location transfers
//!
//! A transfer captures the source WAC of every line when it is requested and
//! moves stock only on approval. Approval re-checks sufficiency for all lines
//! and applies every ledger change plus the status change in one bounded
//! transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    check_availability, find_duplicate_item, plan_transfer_postings, round_quantity, transfer_total_value,
    validate_positive_quantity, validate_transfer_route, DocumentKind, Role, StockLevel, StockRequest,
    TransferLineSnapshot, TransferStatus,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::authz::{Action, Authorizer, Resource};
use crate::db::{begin_bounded, with_deadline};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::ledger;
use crate::services::notification::{DomainEvent, EventPublisher};
use crate::services::period::lock_open_period;
use crate::services::sequence::next_document_number;

#[derive(Clone)]
pub struct TransferService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
    events: EventPublisher,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Transfer {
    pub id: Uuid,
    pub transfer_no: String,
    pub period_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: TransferStatus,
    pub requested_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub total_value: Decimal,
    pub notes: Option<String>,
    pub approval_date: Option<DateTime<Utc>>,
    pub transfer_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    fn resource(&self) -> Resource {
        Resource::Transfer {
            from: self.from_location_id,
            to: self.to_location_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TransferLine {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub wac_at_transfer: Decimal,
    pub line_value: Decimal,
}

impl TransferLine {
    fn snapshot(&self) -> TransferLineSnapshot {
        TransferLineSnapshot {
            item_id: self.item_id,
            quantity: self.quantity,
            wac_at_transfer: self.wac_at_transfer,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferDetail {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub lines: Vec<TransferLine>,
}

#[derive(Debug, Deserialize)]
pub struct TransferLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferInput {
    pub period_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub notes: Option<String>,
    #[serde(default)]
    pub save_as_draft: bool,
    pub lines: Vec<TransferLineInput>,
}

#[derive(Debug, Deserialize)]
pub struct RejectTransferInput {
    pub comment: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransferFilter {
    pub period_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: Option<TransferStatus>,
}

const TRANSFER_COLUMNS: &str = "id, transfer_no, period_id, from_location_id, to_location_id, status, \
                                requested_by, approved_by, total_value, notes, approval_date, transfer_date, \
                                created_at, updated_at";

async fn lock_transfer(conn: &mut PgConnection, transfer_id: Uuid) -> AppResult<Transfer> {
    sqlx::query_as::<_, Transfer>(&format!(
        "SELECT {} FROM transfers WHERE id = $1 FOR UPDATE",
        TRANSFER_COLUMNS
    ))
    .bind(transfer_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Transfer"))
}

async fn fetch_lines(conn: &mut PgConnection, transfer_id: Uuid) -> AppResult<Vec<TransferLine>> {
    let lines = sqlx::query_as::<_, TransferLine>(
        r#"
        SELECT id, transfer_id, item_id, quantity, wac_at_transfer, line_value
        FROM transfer_lines
        WHERE transfer_id = $1
        ORDER BY item_id
        "#,
    )
    .bind(transfer_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(lines)
}

/// Lock the source rows and fail with the full shortfall list if any line
/// is no longer covered
async fn ensure_source_covers(
    conn: &mut PgConnection,
    from_location_id: Uuid,
    requests: &[StockRequest],
) -> AppResult<HashMap<Uuid, StockLevel>> {
    let item_ids: Vec<Uuid> = requests.iter().map(|r| r.item_id).collect();
    let levels = ledger::lock_levels(conn, from_location_id, &item_ids).await?;
    check_availability(requests, &levels)?;
    Ok(levels)
}

impl TransferService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>, events: EventPublisher, timeout: Duration) -> Self {
        Self {
            db,
            authorizer,
            events,
            timeout,
        }
    }

    /// Request a transfer. Nothing is written unless every line is covered
    /// by stock at the source.
    pub async fn create(&self, user: &AuthUser, input: CreateTransferInput) -> AppResult<TransferDetail> {
        validate_transfer_route(input.from_location_id, input.to_location_id)?;
        self.authorizer
            .require(user, Action::CreateTransfer, Resource::Location(input.from_location_id))?;

        if input.lines.is_empty() {
            return Err(AppError::validation("lines", "At least one line is required"));
        }
        if let Some(item_id) = find_duplicate_item(input.lines.iter().map(|l| l.item_id)) {
            return Err(AppError::validation("lines", format!("Item {} is listed more than once", item_id)));
        }

        let requests: Vec<StockRequest> = input
            .lines
            .iter()
            .map(|l| StockRequest {
                item_id: l.item_id,
                quantity: round_quantity(l.quantity),
            })
            .collect();
        // Checked at stored scale: 0.00001 rounds to zero
        for request in &requests {
            validate_positive_quantity(request.quantity)?;
        }
        let status = if input.save_as_draft {
            TransferStatus::Draft
        } else {
            TransferStatus::PendingApproval
        };

        let detail = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            lock_open_period(&mut tx, input.period_id).await?;

            let destination_active = sqlx::query_scalar::<_, bool>("SELECT is_active FROM locations WHERE id = $1")
                .bind(input.to_location_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::not_found("Destination location"))?;
            if !destination_active {
                return Err(AppError::validation("to_location_id", "Destination location is inactive"));
            }

            let source = ensure_source_covers(&mut tx, input.from_location_id, &requests).await?;

            let snapshots: Vec<TransferLineSnapshot> = requests
                .iter()
                .map(|r| TransferLineSnapshot {
                    item_id: r.item_id,
                    quantity: r.quantity,
                    wac_at_transfer: source.get(&r.item_id).map(|l| l.wac).unwrap_or(Decimal::ZERO),
                })
                .collect();

            let transfer_no = next_document_number(&mut tx, DocumentKind::Transfer).await?;
            let transfer = sqlx::query_as::<_, Transfer>(&format!(
                r#"
                INSERT INTO transfers (transfer_no, period_id, from_location_id, to_location_id, status,
                                       requested_by, total_value, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {}
                "#,
                TRANSFER_COLUMNS
            ))
            .bind(&transfer_no)
            .bind(input.period_id)
            .bind(input.from_location_id)
            .bind(input.to_location_id)
            .bind(status.as_str())
            .bind(user.user_id)
            .bind(transfer_total_value(&snapshots))
            .bind(input.notes.as_deref())
            .fetch_one(&mut *tx)
            .await?;

            let mut lines = Vec::with_capacity(snapshots.len());
            for snapshot in &snapshots {
                let line = sqlx::query_as::<_, TransferLine>(
                    r#"
                    INSERT INTO transfer_lines (transfer_id, item_id, quantity, wac_at_transfer, line_value)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id, transfer_id, item_id, quantity, wac_at_transfer, line_value
                    "#,
                )
                .bind(transfer.id)
                .bind(snapshot.item_id)
                .bind(snapshot.quantity)
                .bind(snapshot.wac_at_transfer)
                .bind(snapshot.line_value())
                .fetch_one(&mut *tx)
                .await?;
                lines.push(line);
            }

            tx.commit().await?;
            Ok(TransferDetail { transfer, lines })
        })
        .await?;

        tracing::info!(
            transfer_no = %detail.transfer.transfer_no,
            status = %detail.transfer.status,
            lines = detail.lines.len(),
            "Transfer created"
        );
        Ok(detail)
    }

    /// DRAFT -> PENDING_APPROVAL, re-validating stock at the source
    pub async fn submit(&self, user: &AuthUser, transfer_id: Uuid) -> AppResult<TransferDetail> {
        let detail = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            let transfer = lock_transfer(&mut tx, transfer_id).await?;
            self.authorizer
                .require(user, Action::CreateTransfer, Resource::Location(transfer.from_location_id))?;
            let next = transfer.status.submit()?;
            lock_open_period(&mut tx, transfer.period_id).await?;

            let lines = fetch_lines(&mut tx, transfer_id).await?;
            let requests: Vec<StockRequest> = lines
                .iter()
                .map(|l| StockRequest {
                    item_id: l.item_id,
                    quantity: l.quantity,
                })
                .collect();
            ensure_source_covers(&mut tx, transfer.from_location_id, &requests).await?;

            let transfer = sqlx::query_as::<_, Transfer>(&format!(
                "UPDATE transfers SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
                TRANSFER_COLUMNS
            ))
            .bind(transfer_id)
            .bind(next.as_str())
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(TransferDetail { transfer, lines })
        })
        .await?;

        tracing::info!(transfer_no = %detail.transfer.transfer_no, "Transfer submitted");
        Ok(detail)
    }

    /// Approve and complete in one step. Either every line moves and the
    /// transfer is COMPLETED, or nothing changes.
    pub async fn approve(&self, user: &AuthUser, transfer_id: Uuid) -> AppResult<TransferDetail> {
        self.authorizer.require(user, Action::ApproveTransfer, Resource::Any)?;

        let detail = with_deadline(self.timeout, self.approve_in_tx(user, transfer_id)).await?;

        self.events.publish(DomainEvent::TransferCompleted {
            transfer_id,
            transfer_no: detail.transfer.transfer_no.clone(),
            from_location_id: detail.transfer.from_location_id,
            to_location_id: detail.transfer.to_location_id,
            total_value: detail.transfer.total_value,
        });
        tracing::info!(
            transfer_no = %detail.transfer.transfer_no,
            total_value = %detail.transfer.total_value,
            "Transfer completed"
        );
        Ok(detail)
    }

    async fn approve_in_tx(&self, user: &AuthUser, transfer_id: Uuid) -> AppResult<TransferDetail> {
        let mut tx = begin_bounded(&self.db, self.timeout).await?;
        let transfer = lock_transfer(&mut tx, transfer_id).await?;
        self.authorizer
            .require(user, Action::ApproveTransfer, transfer.resource())?;
        let next = transfer.status.approve()?;
        lock_open_period(&mut tx, transfer.period_id).await?;

        let lines = fetch_lines(&mut tx, transfer_id).await?;
        let snapshots: Vec<TransferLineSnapshot> = lines.iter().map(TransferLine::snapshot).collect();
        let item_ids: Vec<Uuid> = snapshots.iter().map(|s| s.item_id).collect();

        let (source, destination) =
            ledger::lock_level_pair(&mut tx, transfer.from_location_id, transfer.to_location_id, &item_ids).await?;
        let postings = plan_transfer_postings(&snapshots, &source, &destination)?;

        for posting in &postings {
            ledger::write_level(&mut tx, transfer.from_location_id, posting.item_id, posting.source_after).await?;
            ledger::write_level(&mut tx, transfer.to_location_id, posting.item_id, posting.destination_after).await?;
            tracing::debug!(
                item_id = %posting.item_id,
                quantity = %posting.quantity,
                destination_wac = %posting.destination_after.wac,
                "Transfer line posted"
            );
        }

        let transfer = sqlx::query_as::<_, Transfer>(&format!(
            r#"
            UPDATE transfers
            SET status = $2, approved_by = $3, approval_date = NOW(), transfer_date = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(transfer_id)
        .bind(next.as_str())
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TransferDetail { transfer, lines })
    }

    /// Final rejection; the comment is appended to the notes and no stock moves
    pub async fn reject(&self, user: &AuthUser, transfer_id: Uuid, input: RejectTransferInput) -> AppResult<Transfer> {
        self.authorizer.require(user, Action::RejectTransfer, Resource::Any)?;

        let comment = input.comment.trim();
        if comment.is_empty() {
            return Err(AppError::validation("comment", "A rejection comment is required"));
        }

        let transfer = with_deadline(self.timeout, async {
            let mut tx = begin_bounded(&self.db, self.timeout).await?;
            let transfer = lock_transfer(&mut tx, transfer_id).await?;
            self.authorizer
                .require(user, Action::RejectTransfer, transfer.resource())?;
            let next = transfer.status.reject()?;
            lock_open_period(&mut tx, transfer.period_id).await?;

            let transfer = sqlx::query_as::<_, Transfer>(&format!(
                r#"
                UPDATE transfers
                SET status = $2,
                    approved_by = $3,
                    notes = CASE WHEN COALESCE(notes, '') = '' THEN $4 ELSE notes || E'\n' || $4 END,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {}
                "#,
                TRANSFER_COLUMNS
            ))
            .bind(transfer_id)
            .bind(next.as_str())
            .bind(user.user_id)
            .bind(format!("Rejected: {}", comment))
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(transfer)
        })
        .await?;

        self.events.publish(DomainEvent::TransferRejected {
            transfer_id,
            transfer_no: transfer.transfer_no.clone(),
            requested_by: transfer.requested_by,
        });
        tracing::info!(transfer_no = %transfer.transfer_no, "Transfer rejected");
        Ok(transfer)
    }

    pub async fn get(&self, user: &AuthUser, transfer_id: Uuid) -> AppResult<TransferDetail> {
        let transfer = sqlx::query_as::<_, Transfer>(&format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS))
            .bind(transfer_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Transfer"))?;

        self.authorizer
            .require(user, Action::ViewTransfer, transfer.resource())?;

        let mut conn = self.db.acquire().await?;
        let lines = fetch_lines(&mut conn, transfer_id).await?;
        Ok(TransferDetail { transfer, lines })
    }

    /// Transfers touching the caller's locations at either end, newest first
    pub async fn list(&self, user: &AuthUser, filter: TransferFilter) -> AppResult<Vec<Transfer>> {
        if let Some(location_id) = filter.location_id {
            self.authorizer
                .require(user, Action::ViewTransfer, Resource::Location(location_id))?;
        } else {
            self.authorizer.require(user, Action::ViewTransfer, Resource::Any)?;
        }

        let scope: Option<Vec<Uuid>> = (user.role != Role::Admin).then(|| user.location_ids.clone());

        let transfers = sqlx::query_as::<_, Transfer>(&format!(
            r#"
            SELECT {}
            FROM transfers
            WHERE ($1::uuid IS NULL OR period_id = $1)
              AND ($2::uuid IS NULL OR from_location_id = $2 OR to_location_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid[] IS NULL OR from_location_id = ANY($4) OR to_location_id = ANY($4))
            ORDER BY created_at DESC
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(filter.period_id)
        .bind(filter.location_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(scope)
        .fetch_all(&self.db)
        .await?;

        Ok(transfers)
    }
}
