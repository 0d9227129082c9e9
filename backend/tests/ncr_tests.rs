//! Non-conformance report tests
//!
//! Tests for NCR handling including:
//! - Property 7: Terminal NCRs never change status
//! - Property 8: Summaries only count what each outcome implies
//! - Property 9: Summarising the same records twice gives the same totals

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{FinancialImpact, NcrOutcome, NcrStatus, NcrSummary};
use stock_valuation_backend::error::AppError;
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_open_moves_to_any_terminal_state() {
        assert!(NcrStatus::Open.transition(NcrStatus::Credited, None, None).is_ok());
        assert!(NcrStatus::Open.transition(NcrStatus::Rejected, None, None).is_ok());
        assert!(NcrStatus::Open
            .transition(NcrStatus::Resolved, Some(FinancialImpact::None), Some("WRITE_OFF"))
            .is_ok());
    }

    /// Resolving without a financial impact fails with a stable code
    #[test]
    fn test_resolve_requires_financial_impact() {
        let err = NcrStatus::Open
            .transition(NcrStatus::Resolved, None, Some("REPLACED"))
            .unwrap_err();
        let app_err = AppError::from(err);

        assert_eq!(app_err.code(), "FINANCIAL_IMPACT_REQUIRED");
        assert_eq!(app_err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(app_err.detail().field.as_deref(), Some("financial_impact"));
    }

    /// Impact is checked before the resolution type
    #[test]
    fn test_missing_impact_reported_first() {
        let err = NcrStatus::Open.transition(NcrStatus::Resolved, None, None).unwrap_err();
        assert_eq!(AppError::from(err).code(), "FINANCIAL_IMPACT_REQUIRED");
    }

    #[test]
    fn test_resolve_requires_resolution_type() {
        let err = NcrStatus::Open
            .transition(NcrStatus::Resolved, Some(FinancialImpact::Credit), Some("  "))
            .unwrap_err();
        assert_eq!(AppError::from(err).code(), "RESOLUTION_TYPE_REQUIRED");
    }

    #[test]
    fn test_cannot_reopen() {
        let err = NcrStatus::Credited.transition(NcrStatus::Open, None, None).unwrap_err();
        assert_eq!(AppError::from(err).code(), "INVALID_STATUS_TRANSITION");
        assert!(NcrStatus::Open.transition(NcrStatus::Open, None, None).is_err());
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(NcrOutcome::of(NcrStatus::Open, None), NcrOutcome::Pending);
        assert_eq!(NcrOutcome::of(NcrStatus::Credited, None), NcrOutcome::Credit);
        assert_eq!(NcrOutcome::of(NcrStatus::Rejected, None), NcrOutcome::Loss);
        assert_eq!(
            NcrOutcome::of(NcrStatus::Resolved, Some(FinancialImpact::Loss)),
            NcrOutcome::Loss
        );
        assert_eq!(
            NcrOutcome::of(NcrStatus::Resolved, Some(FinancialImpact::None)),
            NcrOutcome::Neutral
        );
    }

    #[test]
    fn test_summary_totals() {
        let summary = NcrSummary::from_records([
            (NcrStatus::Credited, Some(FinancialImpact::Credit), dec("120.00")),
            (NcrStatus::Resolved, Some(FinancialImpact::Credit), dec("30.00")),
            (NcrStatus::Rejected, Some(FinancialImpact::Loss), dec("45.50")),
            (NcrStatus::Resolved, Some(FinancialImpact::None), dec("999.00")),
            (NcrStatus::Open, None, dec("10.00")),
            (NcrStatus::Open, None, dec("5.25")),
        ]);

        assert_eq!(summary.credited_total, dec("150.00"));
        assert_eq!(summary.loss_total, dec("45.50"));
        assert_eq!(summary.pending_total, dec("15.25"));
        assert_eq!(summary.open_count, 2);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(NcrSummary::from_records(Vec::new()), NcrSummary::default());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn status_strategy() -> impl Strategy<Value = NcrStatus> {
        prop_oneof![
            Just(NcrStatus::Open),
            Just(NcrStatus::Credited),
            Just(NcrStatus::Rejected),
            Just(NcrStatus::Resolved),
        ]
    }

    fn impact_strategy() -> impl Strategy<Value = Option<FinancialImpact>> {
        prop_oneof![
            Just(None),
            Just(Some(FinancialImpact::None)),
            Just(Some(FinancialImpact::Credit)),
            Just(Some(FinancialImpact::Loss)),
        ]
    }

    fn value_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    fn record_strategy() -> impl Strategy<Value = (NcrStatus, Option<FinancialImpact>, Decimal)> {
        (status_strategy(), impact_strategy(), value_strategy())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// **Property 7: Terminal NCRs never change status**
        #[test]
        fn prop_terminal_is_final(
            from in status_strategy(),
            to in status_strategy(),
            impact in impact_strategy(),
        ) {
            let result = from.transition(to, impact, Some("CREDIT_NOTE"));
            if from.is_terminal() {
                prop_assert!(result.is_err());
            }
            if from == NcrStatus::Open && to.is_terminal() && (to != NcrStatus::Resolved || impact.is_some()) {
                prop_assert!(result.is_ok());
            }
        }

        /// **Property 8: Every record lands in at most one bucket**
        #[test]
        fn prop_summary_partitions_value(records in prop::collection::vec(record_strategy(), 0..40)) {
            let summary = NcrSummary::from_records(records.iter().copied());

            let counted: Decimal = records
                .iter()
                .filter(|(status, impact, _)| NcrOutcome::of(*status, *impact) != NcrOutcome::Neutral)
                .map(|(_, _, value)| *value)
                .sum();
            let open = records.iter().filter(|(status, _, _)| *status == NcrStatus::Open).count();

            prop_assert_eq!(summary.credited_total + summary.loss_total + summary.pending_total, counted);
            prop_assert_eq!(summary.open_count, open as i64);
        }

        /// **Property 9: Summaries are idempotent and order independent**
        #[test]
        fn prop_summary_idempotent(records in prop::collection::vec(record_strategy(), 0..40)) {
            let first = NcrSummary::from_records(records.iter().copied());
            let second = NcrSummary::from_records(records.iter().copied());
            let reversed = NcrSummary::from_records(records.iter().rev().copied());

            prop_assert_eq!(first, second);
            prop_assert_eq!(first, reversed);
        }
    }
}
