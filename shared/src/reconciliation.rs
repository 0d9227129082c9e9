//! Period-end consumption and manday-cost calculations

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::money::round_money;

/// Monetary inputs of one location's reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionInputs {
    pub opening_stock: Decimal,
    pub receipts: Decimal,
    pub transfers_in: Decimal,
    pub transfers_out: Decimal,
    pub closing_stock: Decimal,
    pub back_charges: Decimal,
    pub credits: Decimal,
    pub condemnations: Decimal,
    pub adjustments: Decimal,
    pub ncr_credits: Decimal,
    pub ncr_losses: Decimal,
}

/// Stock movement and adjustment components behind a consumption figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionBreakdown {
    /// opening + receipts + transfers_in - transfers_out - closing
    pub stock_movement: Decimal,
    pub back_charges: Decimal,
    pub credits: Decimal,
    pub condemnations: Decimal,
    pub adjustments: Decimal,
    pub ncr_credits: Decimal,
    pub ncr_losses: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionResult {
    pub consumption: Decimal,
    pub total_adjustments: Decimal,
    pub breakdown: ConsumptionBreakdown,
}

/// Fold stock movements, manual adjustments and NCR outcomes into a
/// consumption figure.
///
/// NCR credits reduce consumption (the supplier pays), NCR losses increase it.
pub fn calculate_consumption(inputs: &ConsumptionInputs) -> ConsumptionResult {
    let total_adjustments = round_money(
        inputs.back_charges - inputs.credits - inputs.condemnations + inputs.adjustments
            - inputs.ncr_credits
            + inputs.ncr_losses,
    );

    let stock_movement = round_money(
        inputs.opening_stock + inputs.receipts + inputs.transfers_in
            - inputs.transfers_out
            - inputs.closing_stock,
    );

    ConsumptionResult {
        consumption: round_money(stock_movement + total_adjustments),
        total_adjustments,
        breakdown: ConsumptionBreakdown {
            stock_movement,
            back_charges: round_money(inputs.back_charges),
            credits: round_money(inputs.credits),
            condemnations: round_money(inputs.condemnations),
            adjustments: round_money(inputs.adjustments),
            ncr_credits: round_money(inputs.ncr_credits),
            ncr_losses: round_money(inputs.ncr_losses),
        },
    }
}

/// Consumption per person-day served
pub fn calculate_manday_cost(consumption: Decimal, total_mandays: Decimal) -> DomainResult<Decimal> {
    if total_mandays <= Decimal::ZERO {
        return Err(DomainError::InvalidMandayCount(total_mandays));
    }
    Ok(round_money(consumption / total_mandays))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_consumption_without_adjustments() {
        let inputs = ConsumptionInputs {
            opening_stock: dec("1000"),
            receipts: dec("500"),
            closing_stock: dec("900"),
            ..Default::default()
        };
        let result = calculate_consumption(&inputs);
        assert_eq!(result.consumption, dec("600.00"));
        assert_eq!(result.total_adjustments, Decimal::ZERO);
        assert_eq!(result.breakdown.stock_movement, dec("600.00"));
    }

    #[test]
    fn test_ncr_outcomes_shift_consumption() {
        let inputs = ConsumptionInputs {
            ncr_credits: dec("100"),
            ncr_losses: dec("30"),
            ..Default::default()
        };
        let result = calculate_consumption(&inputs);
        assert_eq!(result.total_adjustments, dec("-70.00"));
        assert_eq!(result.consumption, dec("-70.00"));
    }

    #[test]
    fn test_manday_cost() {
        assert_eq!(calculate_manday_cost(dec("32800"), dec("1000")).unwrap(), dec("32.80"));
        assert_eq!(calculate_manday_cost(dec("100"), dec("3")).unwrap(), dec("33.33"));
    }

    #[test]
    fn test_manday_cost_rejects_non_positive_mandays() {
        assert_eq!(
            calculate_manday_cost(dec("100"), Decimal::ZERO),
            Err(DomainError::InvalidMandayCount(Decimal::ZERO))
        );
        assert!(calculate_manday_cost(dec("100"), dec("-5")).is_err());
    }
}
