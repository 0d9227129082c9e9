//! Inter-location transfer workflow

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::stock::{check_availability, StockLevel, StockRequest};
use crate::error::{DomainError, DomainResult};
use crate::money::extend;

/// Transfer workflow states.
///
/// `Approved` is never persisted: approval posts the stock and lands the
/// transfer directly in `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Draft,
    PendingApproval,
    Approved,
    Completed,
    Rejected,
}

crate::text_enum!(TransferStatus, "transfer status", {
    Draft => "DRAFT",
    PendingApproval => "PENDING_APPROVAL",
    Approved => "APPROVED",
    Completed => "COMPLETED",
    Rejected => "REJECTED",
});

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Rejected)
    }

    /// DRAFT -> PENDING_APPROVAL
    pub fn submit(self) -> DomainResult<TransferStatus> {
        match self {
            TransferStatus::Draft => Ok(TransferStatus::PendingApproval),
            other => Err(DomainError::transition(other, TransferStatus::PendingApproval)),
        }
    }

    /// PENDING_APPROVAL -> APPROVED -> COMPLETED, collapsed into one step
    pub fn approve(self) -> DomainResult<TransferStatus> {
        match self {
            TransferStatus::PendingApproval => Ok(TransferStatus::Completed),
            other => Err(DomainError::transition(other, TransferStatus::Approved)),
        }
    }

    /// PENDING_APPROVAL -> REJECTED
    pub fn reject(self) -> DomainResult<TransferStatus> {
        match self {
            TransferStatus::PendingApproval => Ok(TransferStatus::Rejected),
            other => Err(DomainError::transition(other, TransferStatus::Rejected)),
        }
    }
}

/// A transfer line with the source cost captured when it was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineSnapshot {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub wac_at_transfer: Decimal,
}

impl TransferLineSnapshot {
    pub fn line_value(&self) -> Decimal {
        extend(self.quantity, self.wac_at_transfer)
    }
}

/// Ledger effect of one approved line on both locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePosting {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub source_before: StockLevel,
    pub source_after: StockLevel,
    /// `None` when the destination has never held the item
    pub destination_before: Option<StockLevel>,
    pub destination_after: StockLevel,
}

pub fn validate_transfer_route(from_location: Uuid, to_location: Uuid) -> DomainResult<()> {
    if from_location == to_location {
        return Err(DomainError::SameLocation);
    }
    Ok(())
}

pub fn transfer_total_value(lines: &[TransferLineSnapshot]) -> Decimal {
    lines.iter().map(TransferLineSnapshot::line_value).sum()
}

/// Work out every ledger change an approval makes, or none.
///
/// Sufficiency is checked for all lines before any posting is computed. The
/// source side only loses quantity; the destination receives at the captured
/// `wac_at_transfer`.
pub fn plan_transfer_postings(
    lines: &[TransferLineSnapshot],
    source: &HashMap<Uuid, StockLevel>,
    destination: &HashMap<Uuid, StockLevel>,
) -> DomainResult<Vec<LinePosting>> {
    let requests: Vec<StockRequest> = lines
        .iter()
        .map(|line| StockRequest {
            item_id: line.item_id,
            quantity: line.quantity,
        })
        .collect();
    check_availability(&requests, source)?;

    lines
        .iter()
        .map(|line| {
            let source_before = source.get(&line.item_id).copied().unwrap_or_default();
            let source_after = source_before.issue(line.quantity)?;
            let destination_before = destination.get(&line.item_id).copied();
            let destination_after = match destination_before {
                Some(level) => level.receive(line.quantity, line.wac_at_transfer)?,
                None => StockLevel::new(line.quantity, line.wac_at_transfer),
            };

            Ok(LinePosting {
                item_id: line.item_id,
                quantity: line.quantity,
                unit_cost: line.wac_at_transfer,
                source_before,
                source_after,
                destination_before,
                destination_after,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!("PENDING_APPROVAL".parse::<TransferStatus>().unwrap(), TransferStatus::PendingApproval);
        assert_eq!(TransferStatus::Completed.to_string(), "COMPLETED");
        assert!("SENT".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_approval_collapses_into_completed() {
        assert_eq!(TransferStatus::PendingApproval.approve(), Ok(TransferStatus::Completed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in [TransferStatus::Completed, TransferStatus::Rejected] {
            assert!(status.is_terminal());
            assert!(status.approve().is_err());
            assert!(status.reject().is_err());
            assert!(status.submit().is_err());
        }
    }

    #[test]
    fn test_draft_must_be_submitted_first() {
        assert!(TransferStatus::Draft.approve().is_err());
        assert_eq!(TransferStatus::Draft.submit(), Ok(TransferStatus::PendingApproval));
    }

    #[test]
    fn test_route_must_change_location() {
        let here = Uuid::new_v4();
        assert_eq!(validate_transfer_route(here, here), Err(DomainError::SameLocation));
        assert!(validate_transfer_route(here, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_plan_creates_destination_row() {
        let item = Uuid::new_v4();
        let source = HashMap::from([(item, StockLevel::new(dec("30"), dec("10.00")))]);
        let lines = [TransferLineSnapshot {
            item_id: item,
            quantity: dec("20"),
            wac_at_transfer: dec("10.00"),
        }];

        let postings = plan_transfer_postings(&lines, &source, &HashMap::new()).unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].source_after, StockLevel::new(dec("10"), dec("10.00")));
        assert_eq!(postings[0].destination_before, None);
        assert_eq!(postings[0].destination_after, StockLevel::new(dec("20"), dec("10.00")));
        assert_eq!(transfer_total_value(&lines), dec("200.00"));
    }
}
