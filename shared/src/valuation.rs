//! Weighted-average cost and price-variance rules

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::money::{round_money, round_percent, round_unit_cost};

/// Quantity and unit cost after a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WacResult {
    pub new_quantity: Decimal,
    pub new_wac: Decimal,
}

/// Recompute the weighted-average cost when `incoming_qty` arrives at
/// `incoming_unit_price`.
///
/// `new_wac = (current_qty × current_wac + incoming_qty × incoming_price) / new_qty`
///
/// A location holding nothing (or, after an unenforced over-issue, less than
/// nothing) takes the incoming price as its cost. The result is rounded to
/// unit-cost scale.
pub fn recalculate_wac(
    current_qty: Decimal,
    current_wac: Decimal,
    incoming_qty: Decimal,
    incoming_unit_price: Decimal,
) -> DomainResult<WacResult> {
    if incoming_qty <= Decimal::ZERO {
        return Err(DomainError::InvalidQuantity(incoming_qty));
    }

    let new_quantity = current_qty + incoming_qty;

    let new_wac = if current_qty <= Decimal::ZERO {
        incoming_unit_price
    } else {
        let total_value = current_qty * current_wac + incoming_qty * incoming_unit_price;
        total_value / new_quantity
    };

    Ok(WacResult {
        new_quantity,
        new_wac: round_unit_cost(new_wac),
    })
}

/// Outcome of comparing a delivery price against the period-locked price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceResult {
    pub has_variance: bool,
    /// Per-unit difference, `unit_price - period_price`
    pub variance: Decimal,
    pub variance_percent: Decimal,
    /// `variance × quantity`, rounded to money scale
    pub variance_amount: Decimal,
}

impl VarianceResult {
    /// Monetary value an auto-generated NCR carries for this variance
    pub fn ncr_value(&self) -> Decimal {
        self.variance_amount.abs()
    }
}

/// Compare a received unit price with the period price.
///
/// Any non-zero difference is a variance; there is no tolerance band.
pub fn check_variance(unit_price: Decimal, period_price: Decimal, quantity: Decimal) -> VarianceResult {
    let variance = unit_price - period_price;
    let variance_amount = round_money(variance * quantity);

    let variance_percent = if period_price.is_zero() {
        if unit_price > Decimal::ZERO {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    } else {
        round_percent(variance / period_price * Decimal::ONE_HUNDRED)
    };

    VarianceResult {
        has_variance: !variance.is_zero(),
        variance,
        variance_percent,
        variance_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_wac_into_empty_location_takes_receipt_price() {
        let result = recalculate_wac(Decimal::ZERO, Decimal::ZERO, dec("20"), dec("10.00")).unwrap();
        assert_eq!(result.new_quantity, dec("20"));
        assert_eq!(result.new_wac, dec("10.00"));
    }

    #[test]
    fn test_wac_blends_existing_stock() {
        let result = recalculate_wac(dec("50"), dec("9.00"), dec("20"), dec("10.00")).unwrap();
        assert_eq!(result.new_quantity, dec("70"));
        assert_eq!(result.new_wac, dec("9.2857"));
    }

    #[test]
    fn test_wac_rejects_non_positive_quantity() {
        assert_eq!(
            recalculate_wac(dec("5"), dec("1"), Decimal::ZERO, dec("1")),
            Err(DomainError::InvalidQuantity(Decimal::ZERO))
        );
        assert!(recalculate_wac(dec("5"), dec("1"), dec("-1"), dec("1")).is_err());
    }

    #[test]
    fn test_variance_over_period_price() {
        let result = check_variance(dec("12.50"), dec("10.00"), dec("8"));
        assert!(result.has_variance);
        assert_eq!(result.variance, dec("2.50"));
        assert_eq!(result.variance_amount, dec("20.00"));
        assert_eq!(result.variance_percent, dec("25.00"));
        assert_eq!(result.ncr_value(), dec("20.00"));
    }

    #[test]
    fn test_variance_under_period_price_is_flagged() {
        let result = check_variance(dec("9.00"), dec("10.00"), dec("4"));
        assert!(result.has_variance);
        assert_eq!(result.variance_amount, dec("-4.00"));
        assert_eq!(result.ncr_value(), dec("4.00"));
    }

    /// 0.0001 over the period price on 10 units is still a variance; its
    /// amount rounds to nothing
    #[test]
    fn test_sub_cent_variance_still_flagged() {
        let result = check_variance(dec("10.0001"), dec("10.0000"), dec("10"));
        assert!(result.has_variance);
        assert_eq!(result.variance_amount, Decimal::ZERO);
        assert_eq!(result.ncr_value(), Decimal::ZERO);
    }

    #[test]
    fn test_variance_against_zero_period_price() {
        let priced = check_variance(dec("1.00"), Decimal::ZERO, dec("1"));
        assert_eq!(priced.variance_percent, Decimal::ONE_HUNDRED);

        let free = check_variance(Decimal::ZERO, Decimal::ZERO, dec("1"));
        assert!(!free.has_variance);
        assert_eq!(free.variance_percent, Decimal::ZERO);
    }
}
