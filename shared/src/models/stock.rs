//! Stock ledger values

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::money::extend;
use crate::validation::validate_positive_quantity;
use crate::valuation::recalculate_wac;

/// Quantity on hand and weighted-average cost of one (location, item) row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub on_hand: Decimal,
    pub wac: Decimal,
}

impl StockLevel {
    pub fn new(on_hand: Decimal, wac: Decimal) -> Self {
        Self { on_hand, wac }
    }

    /// Stock value at current cost
    pub fn value(&self) -> Decimal {
        extend(self.on_hand, self.wac)
    }

    /// Add stock at a receipt price, blending the cost
    pub fn receive(&self, quantity: Decimal, unit_price: Decimal) -> DomainResult<StockLevel> {
        let result = recalculate_wac(self.on_hand, self.wac, quantity, unit_price)?;
        Ok(StockLevel {
            on_hand: result.new_quantity,
            wac: result.new_wac,
        })
    }

    /// Remove stock; cost is unchanged. Sufficiency is the caller's check.
    pub fn issue(&self, quantity: Decimal) -> DomainResult<StockLevel> {
        validate_positive_quantity(quantity)?;
        Ok(StockLevel {
            on_hand: self.on_hand - quantity,
            wac: self.wac,
        })
    }
}

/// One item a debit could not cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub item_id: Uuid,
    pub requested: Decimal,
    pub available: Decimal,
}

/// A quantity to take out of a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
}

/// Check every request against the levels on hand.
///
/// Collects a shortfall for each uncovered line rather than stopping at the
/// first, so callers can report the whole list. Items missing from `levels`
/// have nothing available.
pub fn check_availability(
    requests: &[StockRequest],
    levels: &HashMap<Uuid, StockLevel>,
) -> DomainResult<()> {
    let shortfalls: Vec<StockShortfall> = requests
        .iter()
        .filter_map(|request| {
            let available = levels
                .get(&request.item_id)
                .map(|level| level.on_hand)
                .unwrap_or(Decimal::ZERO);
            (request.quantity > available).then(|| StockShortfall {
                item_id: request.item_id,
                requested: request.quantity,
                available,
            })
        })
        .collect();

    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(DomainError::InsufficientStock(shortfalls))
    }
}
