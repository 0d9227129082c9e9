//! Non-conformance reports

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::valuation::VarianceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NcrType {
    Manual,
    PriceVariance,
}

crate::text_enum!(NcrType, "NCR type", {
    Manual => "MANUAL",
    PriceVariance => "PRICE_VARIANCE",
});

/// NCR states: OPEN is initial, the other three are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NcrStatus {
    Open,
    Credited,
    Rejected,
    Resolved,
}

crate::text_enum!(NcrStatus, "NCR status", {
    Open => "OPEN",
    Credited => "CREDITED",
    Rejected => "REJECTED",
    Resolved => "RESOLVED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinancialImpact {
    None,
    Credit,
    Loss,
}

crate::text_enum!(FinancialImpact, "financial impact", {
    None => "NONE",
    Credit => "CREDIT",
    Loss => "LOSS",
});

impl NcrStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NcrStatus::Open)
    }

    /// Validate a status change.
    ///
    /// Only OPEN may move, and only into a terminal state. RESOLVED needs an
    /// explicit financial impact and a resolution type; CREDITED and REJECTED
    /// imply theirs.
    pub fn transition(
        self,
        target: NcrStatus,
        financial_impact: Option<FinancialImpact>,
        resolution_type: Option<&str>,
    ) -> DomainResult<()> {
        if self.is_terminal() || !target.is_terminal() {
            return Err(DomainError::transition(self, target));
        }

        if target == NcrStatus::Resolved {
            if financial_impact.is_none() {
                return Err(DomainError::FinancialImpactRequired);
            }
            if resolution_type.map_or(true, |r| r.trim().is_empty()) {
                return Err(DomainError::ResolutionTypeRequired);
            }
        }

        Ok(())
    }
}

/// How an NCR counts towards a period's reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcrOutcome {
    Credit,
    Loss,
    Pending,
    Neutral,
}

impl NcrOutcome {
    pub fn of(status: NcrStatus, financial_impact: Option<FinancialImpact>) -> Self {
        match (status, financial_impact) {
            (NcrStatus::Open, _) => NcrOutcome::Pending,
            (NcrStatus::Credited, _) => NcrOutcome::Credit,
            (NcrStatus::Rejected, _) => NcrOutcome::Loss,
            (NcrStatus::Resolved, Some(FinancialImpact::Credit)) => NcrOutcome::Credit,
            (NcrStatus::Resolved, Some(FinancialImpact::Loss)) => NcrOutcome::Loss,
            (NcrStatus::Resolved, _) => NcrOutcome::Neutral,
        }
    }
}

/// NCR totals for one location in one period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NcrSummary {
    pub credited_total: Decimal,
    pub loss_total: Decimal,
    pub pending_total: Decimal,
    pub open_count: i64,
}

impl NcrSummary {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (NcrStatus, Option<FinancialImpact>, Decimal)>,
    {
        records
            .into_iter()
            .fold(NcrSummary::default(), |mut summary, (status, impact, value)| {
                match NcrOutcome::of(status, impact) {
                    NcrOutcome::Credit => summary.credited_total += value,
                    NcrOutcome::Loss => summary.loss_total += value,
                    NcrOutcome::Pending => {
                        summary.pending_total += value;
                        summary.open_count += 1;
                    }
                    NcrOutcome::Neutral => {}
                }
                summary
            })
    }
}

/// Reason text for an auto-generated price-variance NCR
pub fn price_variance_reason(item_name: &str, unit_price: Decimal, period_price: Decimal, variance: &VarianceResult) -> String {
    format!(
        "Price variance on {}: delivered at {} against period price {} ({}%)",
        item_name, unit_price, period_price, variance.variance_percent
    )
}
