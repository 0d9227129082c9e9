//! Accounting period lifecycle

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// DRAFT -> OPEN -> PENDING_CLOSE -> CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    Draft,
    Open,
    PendingClose,
    Closed,
}

crate::text_enum!(PeriodStatus, "period status", {
    Draft => "DRAFT",
    Open => "OPEN",
    PendingClose => "PENDING_CLOSE",
    Closed => "CLOSED",
});

impl PeriodStatus {
    /// Only an OPEN period accepts postings, transfers, NCRs and reconciliations
    pub fn accepts_mutations(&self) -> bool {
        matches!(self, PeriodStatus::Open)
    }

    /// Prices may be locked until the period starts closing
    pub fn accepts_price_changes(&self) -> bool {
        matches!(self, PeriodStatus::Draft | PeriodStatus::Open)
    }

    pub fn next(&self) -> Option<PeriodStatus> {
        match self {
            PeriodStatus::Draft => Some(PeriodStatus::Open),
            PeriodStatus::Open => Some(PeriodStatus::PendingClose),
            PeriodStatus::PendingClose => Some(PeriodStatus::Closed),
            PeriodStatus::Closed => None,
        }
    }

    /// Statuses only ever move one step forward
    pub fn advance_to(self, target: PeriodStatus) -> DomainResult<PeriodStatus> {
        match self.next() {
            Some(next) if next == target => Ok(target),
            _ => Err(DomainError::transition(self, target)),
        }
    }
}

/// Close readiness of one location within a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationReadiness {
    pub location_id: Uuid,
    pub is_ready: bool,
}

/// Locations still holding a period open
pub fn locations_not_ready(readiness: &[LocationReadiness]) -> Vec<Uuid> {
    readiness
        .iter()
        .filter(|r| !r.is_ready)
        .map(|r| r.location_id)
        .collect()
}

/// Non-blocking notice raised while closing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseWarning {
    pub location_id: Uuid,
    pub open_ncr_count: i64,
    pub message: String,
}

impl CloseWarning {
    pub fn open_ncrs(location_id: Uuid, open_ncr_count: i64) -> Self {
        Self {
            location_id,
            open_ncr_count,
            message: format!("{} NCR(s) still open at this location", open_ncr_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_moves_one_step_at_a_time() {
        assert_eq!(PeriodStatus::Draft.advance_to(PeriodStatus::Open), Ok(PeriodStatus::Open));
        assert_eq!(
            PeriodStatus::Open.advance_to(PeriodStatus::PendingClose),
            Ok(PeriodStatus::PendingClose)
        );
        assert_eq!(
            PeriodStatus::PendingClose.advance_to(PeriodStatus::Closed),
            Ok(PeriodStatus::Closed)
        );
        assert!(PeriodStatus::Open.advance_to(PeriodStatus::Closed).is_err());
        assert!(PeriodStatus::Closed.advance_to(PeriodStatus::Open).is_err());
        assert!(PeriodStatus::Draft.advance_to(PeriodStatus::Draft).is_err());
    }

    #[test]
    fn test_only_open_accepts_mutations() {
        assert!(PeriodStatus::Open.accepts_mutations());
        assert!(!PeriodStatus::Draft.accepts_mutations());
        assert!(!PeriodStatus::PendingClose.accepts_mutations());
        assert!(!PeriodStatus::Closed.accepts_mutations());
    }

    #[test]
    fn test_locations_not_ready() {
        let ready = Uuid::new_v4();
        let pending = Uuid::new_v4();
        let readiness = [
            LocationReadiness { location_id: ready, is_ready: true },
            LocationReadiness { location_id: pending, is_ready: false },
        ];
        assert_eq!(locations_not_ready(&readiness), vec![pending]);
    }
}
