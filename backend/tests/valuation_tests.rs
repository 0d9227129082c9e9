//! Valuation tests
//!
//! Tests for receipt costing including:
//! - Property 1: WAC stays between the old cost and the incoming price
//! - Property 2: An empty location takes the incoming price
//! - Property 3: Any price difference is a variance, signed like the difference

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{check_variance, recalculate_wac, DomainError, StockLevel};
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

    /// 100 @ 10.00 plus 50 @ 12.00 blends to 10.6667
    #[test]
    fn test_wac_blends_receipt() {
        let result = recalculate_wac(dec("100"), dec("10.00"), dec("50"), dec("12.00")).unwrap();
        assert_eq!(result.new_quantity, dec("150"));
        assert_eq!(result.new_wac, dec("10.6667"));
    }

    /// Destination holding 50 @ 9.00 receives 20 @ 10.00
    #[test]
    fn test_transfer_receipt_blends_at_destination() {
        let destination = StockLevel::new(dec("50"), dec("9.00"));
        let after = destination.receive(dec("20"), dec("10.00")).unwrap();

        assert_eq!(after.on_hand, dec("70"));
        assert_eq!(after.wac, dec("9.2857"));
    }

    /// First delivery into an empty ledger row
    #[test]
    fn test_first_receipt_takes_price() {
        let after = StockLevel::default().receive(dec("20"), dec("10.00")).unwrap();
        assert_eq!(after.on_hand, dec("20"));
        assert_eq!(after.wac, dec("10.00"));
    }

    /// Negative stock left by an unenforced over-issue does not skew the cost
    #[test]
    fn test_negative_on_hand_takes_price() {
        let result = recalculate_wac(dec("-5"), dec("8.00"), dec("10"), dec("9.00")).unwrap();
        assert_eq!(result.new_quantity, dec("5"));
        assert_eq!(result.new_wac, dec("9.00"));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        assert_eq!(
            recalculate_wac(dec("10"), dec("1"), Decimal::ZERO, dec("2")),
            Err(DomainError::InvalidQuantity(Decimal::ZERO))
        );
        assert!(recalculate_wac(dec("10"), dec("1"), dec("-1"), dec("2")).is_err());
    }

    #[test]
    fn test_issue_keeps_cost() {
        let level = StockLevel::new(dec("40"), dec("3.1250"));
        let after = level.issue(dec("15")).unwrap();
        assert_eq!(after.on_hand, dec("25"));
        assert_eq!(after.wac, dec("3.1250"));
        assert_eq!(after.value(), dec("78.13"));
    }

    /// Price rose from 10.00 to 11.50 on 40 units
    #[test]
    fn test_price_increase_variance() {
        let result = check_variance(dec("11.50"), dec("10.00"), dec("40"));
        assert!(result.has_variance);
        assert_eq!(result.variance, dec("1.50"));
        assert_eq!(result.variance_percent, dec("15.00"));
        assert_eq!(result.variance_amount, dec("60.00"));
        assert_eq!(result.ncr_value(), dec("60.00"));
    }

    #[test]
    fn test_price_decrease_variance_is_negative() {
        let result = check_variance(dec("9.00"), dec("10.00"), dec("12"));
        assert!(result.has_variance);
        assert_eq!(result.variance_percent, dec("-10.00"));
        assert_eq!(result.variance_amount, dec("-12.00"));
        assert_eq!(result.ncr_value(), dec("12.00"));
    }

    #[test]
    fn test_matching_price_has_no_variance() {
        let result = check_variance(dec("10.00"), dec("10.0000"), dec("100"));
        assert!(!result.has_variance);
        assert_eq!(result.variance_amount, Decimal::ZERO);
    }

    /// Any difference counts, however small
    #[test]
    fn test_no_tolerance_band() {
        let result = check_variance(dec("10.0001"), dec("10.0000"), dec("1"));
        assert!(result.has_variance);
    }

    #[test]
    fn test_zero_period_price() {
        assert_eq!(check_variance(dec("2.00"), Decimal::ZERO, dec("5")).variance_percent, dec("100"));
        assert!(!check_variance(Decimal::ZERO, Decimal::ZERO, dec("5")).has_variance);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Quantities with up to four decimal places
    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10_000_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    /// Unit costs with up to four decimal places
    fn unit_cost_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..=5_000_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// **Property 1: WAC stays between the old cost and the incoming price**
        #[test]
        fn prop_wac_bounded(
            current_qty in quantity_strategy(),
            current_wac in unit_cost_strategy(),
            incoming_qty in quantity_strategy(),
            incoming_price in unit_cost_strategy(),
        ) {
            let result = recalculate_wac(current_qty, current_wac, incoming_qty, incoming_price).unwrap();

            prop_assert!(result.new_wac >= current_wac.min(incoming_price));
            prop_assert!(result.new_wac <= current_wac.max(incoming_price));
            prop_assert_eq!(result.new_quantity, current_qty + incoming_qty);
        }

        /// **Property 2: An empty location takes the incoming price**
        #[test]
        fn prop_empty_location_takes_price(
            stale_wac in unit_cost_strategy(),
            incoming_qty in quantity_strategy(),
            incoming_price in unit_cost_strategy(),
        ) {
            let result = recalculate_wac(Decimal::ZERO, stale_wac, incoming_qty, incoming_price).unwrap();
            prop_assert_eq!(result.new_wac, incoming_price);
        }

        /// **Property 3: Variance sign and detection follow the price difference**
        #[test]
        fn prop_variance_sign(
            unit_price in unit_cost_strategy(),
            period_price in unit_cost_strategy(),
            quantity in quantity_strategy(),
        ) {
            let result = check_variance(unit_price, period_price, quantity);

            prop_assert_eq!(result.has_variance, unit_price != period_price);
            prop_assert_eq!(result.variance, unit_price - period_price);
            prop_assert!(result.ncr_value() >= Decimal::ZERO);
            if unit_price > period_price {
                prop_assert!(result.variance_amount >= Decimal::ZERO);
            }
            if unit_price < period_price {
                prop_assert!(result.variance_amount <= Decimal::ZERO);
            }
        }
    }
}
