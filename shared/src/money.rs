//! Rounding policy for money, quantities and unit costs
//!
//! Every rounding in the engine goes through these helpers so the policy is
//! the same at every boundary: half-up (midpoint away from zero).
//! Money carries 2 decimal places, quantities and unit costs carry 4.

use rust_decimal::{Decimal, RoundingStrategy};

pub const MONEY_SCALE: u32 = 2;
pub const QUANTITY_SCALE: u32 = 4;
pub const UNIT_COST_SCALE: u32 = 4;
pub const PERCENT_SCALE: u32 = 2;

const STRATEGY: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, STRATEGY)
}

pub fn round_quantity(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUANTITY_SCALE, STRATEGY)
}

pub fn round_unit_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(UNIT_COST_SCALE, STRATEGY)
}

pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_SCALE, STRATEGY)
}

/// Value of a quantity at a unit cost, rounded to money scale
pub fn extend(quantity: Decimal, unit_cost: Decimal) -> Decimal {
    round_money(quantity * unit_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_money_rounds_half_up() {
        assert_eq!(round_money(dec("2.345")), dec("2.35"));
        assert_eq!(round_money(dec("2.355")), dec("2.36"));
        assert_eq!(round_money(dec("-2.345")), dec("-2.35"));
    }

    #[test]
    fn test_unit_cost_scale() {
        assert_eq!(round_unit_cost(dec("9.285714")), dec("9.2857"));
        assert_eq!(round_unit_cost(dec("0.00005")), dec("0.0001"));
    }

    #[test]
    fn test_extend() {
        assert_eq!(extend(dec("3"), dec("1.3333")), dec("4.00"));
        assert_eq!(extend(dec("20"), dec("10")), dec("200.00"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_rounding_is_idempotent_and_close(n in -1_000_000_000i64..1_000_000_000i64) {
                let value = Decimal::new(n, 6);
                let rounded = round_money(value);

                prop_assert_eq!(round_money(rounded), rounded);
                prop_assert!((rounded - value).abs() <= dec("0.005"));
                prop_assert!(rounded.scale() <= MONEY_SCALE);
            }
        }
    }
}
