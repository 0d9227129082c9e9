//! Domain rule violations raised by the pure calculators and state machines

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::StockShortfall;

/// Result type used across the domain rules.
pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("total mandays must be positive, got {0}")]
    InvalidMandayCount(Decimal),

    #[error("cannot move from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("financial impact is required to resolve an NCR")]
    FinancialImpactRequired,

    #[error("resolution type is required to resolve an NCR")]
    ResolutionTypeRequired,

    #[error("insufficient stock for {} item(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    #[error("source and destination locations must differ")]
    SameLocation,

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

impl DomainError {
    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
