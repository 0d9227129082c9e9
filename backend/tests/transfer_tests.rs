//! Transfer workflow tests
//!
//! Tests for inter-location transfers including:
//! - Property 4: Approval conserves quantity and value across both ends
//! - Property 5: A shortfall on any line leaves every level untouched
//! - Property 6: Terminal transfers never move again

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    extend, plan_transfer_postings, transfer_total_value, DomainError, StockLevel,
    TransferLineSnapshot, TransferStatus,
};
use stock_valuation_backend::error::AppError;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

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

    /// Source 100 @ 10.00 sends 20 to a destination holding 50 @ 9.00
    #[test]
    fn test_approval_posts_both_ends() {
        let item = Uuid::new_v4();
        let source = HashMap::from([(item, StockLevel::new(dec("100"), dec("10.00")))]);
        let destination = HashMap::from([(item, StockLevel::new(dec("50"), dec("9.00")))]);
        let lines = [TransferLineSnapshot {
            item_id: item,
            quantity: dec("20"),
            wac_at_transfer: dec("10.00"),
        }];

        let postings = plan_transfer_postings(&lines, &source, &destination).unwrap();
        assert_eq!(postings.len(), 1);

        let posting = &postings[0];
        assert_eq!(posting.source_after, StockLevel::new(dec("80"), dec("10.00")));
        assert_eq!(posting.destination_after.on_hand, dec("70"));
        assert_eq!(posting.destination_after.wac, dec("9.2857"));
        assert_eq!(transfer_total_value(&lines), dec("200.00"));
    }

    /// Request 100 against 50 available: nothing posts, detail names the line
    #[test]
    fn test_shortfall_reports_requested_and_available() {
        let covered = Uuid::new_v4();
        let short = Uuid::new_v4();
        let source = HashMap::from([
            (covered, StockLevel::new(dec("500"), dec("2.00"))),
            (short, StockLevel::new(dec("50"), dec("4.00"))),
        ]);
        let lines = [
            TransferLineSnapshot {
                item_id: covered,
                quantity: dec("10"),
                wac_at_transfer: dec("2.00"),
            },
            TransferLineSnapshot {
                item_id: short,
                quantity: dec("100"),
                wac_at_transfer: dec("4.00"),
            },
        ];

        let err = plan_transfer_postings(&lines, &source, &HashMap::new()).unwrap_err();
        let shortfalls = match &err {
            DomainError::InsufficientStock(shortfalls) => shortfalls.clone(),
            other => panic!("expected insufficient stock, got {:?}", other),
        };
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].item_id, short);
        assert_eq!(shortfalls[0].requested, dec("100"));
        assert_eq!(shortfalls[0].available, dec("50"));

        let app_err = AppError::from(err);
        assert_eq!(app_err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(app_err.status(), axum::http::StatusCode::CONFLICT);
        let details = app_err.detail().details.unwrap();
        assert_eq!(details[0]["requested"], serde_json::json!("100"));
        assert_eq!(details[0]["available"], serde_json::json!("50"));
    }

    #[test]
    fn test_item_missing_at_source_has_nothing_available() {
        let item = Uuid::new_v4();
        let lines = [TransferLineSnapshot {
            item_id: item,
            quantity: dec("1"),
            wac_at_transfer: dec("1.00"),
        }];

        let err = plan_transfer_postings(&lines, &HashMap::new(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(ref s) if s[0].available == Decimal::ZERO));
    }

    #[test]
    fn test_same_location_code() {
        let here = Uuid::new_v4();
        let err = AppError::from(shared::validate_transfer_route(here, here).unwrap_err());
        assert_eq!(err.code(), "SAME_LOCATION");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_workflow_path() {
        let status = TransferStatus::Draft.submit().unwrap();
        assert_eq!(status, TransferStatus::PendingApproval);
        assert_eq!(status.approve().unwrap(), TransferStatus::Completed);
        assert_eq!(status.reject().unwrap(), TransferStatus::Rejected);
    }

    #[test]
    fn test_double_approval_is_a_transition_error() {
        let err = AppError::from(TransferStatus::Completed.approve().unwrap_err());
        assert_eq!(err.code(), "INVALID_STATUS_TRANSITION");
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=1_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    fn unit_cost_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..=500_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    fn status_strategy() -> impl Strategy<Value = TransferStatus> {
        prop_oneof![
            Just(TransferStatus::Draft),
            Just(TransferStatus::PendingApproval),
            Just(TransferStatus::Completed),
            Just(TransferStatus::Rejected),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// **Property 4: Approval conserves quantity and value**
        ///
        /// The source loses exactly what the destination gains, valued at the
        /// captured source cost.
        #[test]
        fn prop_transfer_conserves_quantity(
            on_hand in quantity_strategy(),
            source_wac in unit_cost_strategy(),
            dest_on_hand in quantity_strategy(),
            dest_wac in unit_cost_strategy(),
            share in 1u32..=100u32,
        ) {
            let item = Uuid::new_v4();
            let quantity = (on_hand * Decimal::from(share) / Decimal::ONE_HUNDRED).round_dp(2);
            prop_assume!(quantity > Decimal::ZERO);

            let source = HashMap::from([(item, StockLevel::new(on_hand, source_wac))]);
            let destination = HashMap::from([(item, StockLevel::new(dest_on_hand, dest_wac))]);
            let lines = [TransferLineSnapshot { item_id: item, quantity, wac_at_transfer: source_wac }];

            let posting = plan_transfer_postings(&lines, &source, &destination).unwrap()[0];

            let before = posting.source_before.on_hand + dest_on_hand;
            let after = posting.source_after.on_hand + posting.destination_after.on_hand;
            prop_assert_eq!(before, after);
            prop_assert_eq!(posting.source_after.wac, source_wac);
            prop_assert!(posting.source_after.on_hand >= Decimal::ZERO);
            prop_assert_eq!(transfer_total_value(&lines), extend(quantity, source_wac));
        }

        /// **Property 5: A shortfall on any line rejects the whole transfer**
        #[test]
        fn prop_shortfall_posts_nothing(
            on_hand in quantity_strategy(),
            excess in quantity_strategy(),
            wac in unit_cost_strategy(),
        ) {
            let covered = Uuid::new_v4();
            let short = Uuid::new_v4();
            let source = HashMap::from([
                (covered, StockLevel::new(on_hand, wac)),
                (short, StockLevel::new(on_hand, wac)),
            ]);
            let lines = [
                TransferLineSnapshot { item_id: covered, quantity: on_hand, wac_at_transfer: wac },
                TransferLineSnapshot { item_id: short, quantity: on_hand + excess, wac_at_transfer: wac },
            ];

            match plan_transfer_postings(&lines, &source, &HashMap::new()) {
                Err(DomainError::InsufficientStock(shortfalls)) => {
                    prop_assert_eq!(shortfalls.len(), 1);
                    prop_assert_eq!(shortfalls[0].item_id, short);
                }
                other => prop_assert!(false, "expected shortfall, got {:?}", other),
            }
        }

        /// **Property 6: Terminal transfers never move again**
        #[test]
        fn prop_terminal_is_final(status in status_strategy()) {
            if status.is_terminal() {
                prop_assert!(status.submit().is_err());
                prop_assert!(status.approve().is_err());
                prop_assert!(status.reject().is_err());
            } else {
                let moves = [status.submit(), status.approve(), status.reject()];
                prop_assert!(moves.iter().any(|m| m.is_ok()));
            }
        }
    }
}
