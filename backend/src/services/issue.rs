//! Stock issues: consumption out of a location at current WAC

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    check_availability, extend, find_duplicate_item, round_quantity, validate_positive_quantity, DocumentKind,
    StockRequest,
};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::authz::{Action, Authorizer, Resource};
use crate::db::{begin_bounded, with_deadline};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::ledger;
use crate::services::period::lock_open_period;
use crate::services::sequence::next_document_number;

#[derive(Clone)]
pub struct IssueService {
    db: PgPool,
    authorizer: Arc<dyn Authorizer>,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Issue {
    pub id: Uuid,
    pub issue_no: String,
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub issue_date: NaiveDate,
    pub purpose: Option<String>,
    pub total_value: Decimal,
    pub posted_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct IssueLine {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub wac_at_issue: Decimal,
    pub line_value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: Issue,
    pub lines: Vec<IssueLine>,
}

#[derive(Debug, Deserialize)]
pub struct IssueLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct PostIssueInput {
    pub period_id: Uuid,
    pub location_id: Uuid,
    pub issue_date: Option<NaiveDate>,
    pub purpose: Option<String>,
    pub lines: Vec<IssueLineInput>,
}

impl IssueService {
    pub fn new(db: PgPool, authorizer: Arc<dyn Authorizer>, timeout: Duration) -> Self {
        Self { db, authorizer, timeout }
    }

    /// Issue stock. All lines are checked before any is posted; WAC is left
    /// untouched.
    pub async fn post(&self, user: &AuthUser, input: PostIssueInput) -> AppResult<IssueDetail> {
        self.authorizer
            .require(user, Action::PostIssue, Resource::Location(input.location_id))?;

        if input.lines.is_empty() {
            return Err(AppError::validation("lines", "At least one line is required"));
        }
        for line in &input.lines {
            validate_positive_quantity(round_quantity(line.quantity))?;
        }
        if let Some(item_id) = find_duplicate_item(input.lines.iter().map(|l| l.item_id)) {
            return Err(AppError::validation("lines", format!("Item {} is listed more than once", item_id)));
        }

        let detail = with_deadline(self.timeout, self.post_in_tx(user, &input)).await?;

        tracing::info!(
            issue_no = %detail.issue.issue_no,
            total_value = %detail.issue.total_value,
            "Issue posted"
        );
        Ok(detail)
    }

    async fn post_in_tx(&self, user: &AuthUser, input: &PostIssueInput) -> AppResult<IssueDetail> {
        let requests: Vec<StockRequest> = input
            .lines
            .iter()
            .map(|l| StockRequest {
                item_id: l.item_id,
                quantity: round_quantity(l.quantity),
            })
            .collect();
        let item_ids: Vec<Uuid> = requests.iter().map(|r| r.item_id).collect();

        let mut tx = begin_bounded(&self.db, self.timeout).await?;
        let period = lock_open_period(&mut tx, input.period_id).await?;

        let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        if !period.range().contains(issue_date) {
            return Err(AppError::validation("issue_date", "Issue date falls outside the period"));
        }

        let levels = ledger::lock_levels(&mut tx, input.location_id, &item_ids).await?;
        check_availability(&requests, &levels)?;

        let total_value: Decimal = requests
            .iter()
            .map(|r| extend(r.quantity, levels.get(&r.item_id).map(|l| l.wac).unwrap_or_default()))
            .sum();

        let issue_no = next_document_number(&mut tx, DocumentKind::Issue).await?;
        let issue = sqlx::query_as::<_, Issue>(
            r#"
            INSERT INTO issues (issue_no, period_id, location_id, issue_date, purpose, total_value, posted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, issue_no, period_id, location_id, issue_date, purpose, total_value, posted_by, created_at
            "#,
        )
        .bind(&issue_no)
        .bind(input.period_id)
        .bind(input.location_id)
        .bind(issue_date)
        .bind(input.purpose.as_deref())
        .bind(total_value)
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(requests.len());
        for request in &requests {
            let level = levels.get(&request.item_id).copied().unwrap_or_default();
            let after = level.issue(request.quantity)?;
            ledger::write_level(&mut tx, input.location_id, request.item_id, after).await?;

            let line = sqlx::query_as::<_, IssueLine>(
                r#"
                INSERT INTO issue_lines (issue_id, item_id, quantity, wac_at_issue, line_value)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, issue_id, item_id, quantity, wac_at_issue, line_value
                "#,
            )
            .bind(issue.id)
            .bind(request.item_id)
            .bind(request.quantity)
            .bind(level.wac)
            .bind(extend(request.quantity, level.wac))
            .fetch_one(&mut *tx)
            .await?;
            lines.push(line);
        }

        tx.commit().await?;
        Ok(IssueDetail { issue, lines })
    }
}
