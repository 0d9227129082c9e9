//! Validation utilities for business keys and posted lines

use rust_decimal::Decimal;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Document Numbers
// ============================================================================

/// Business-key prefixes handed out by the document sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Transfer,
    Ncr,
    Delivery,
    Issue,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Transfer => "TRF",
            DocumentKind::Ncr => "NCR",
            DocumentKind::Delivery => "DLV",
            DocumentKind::Issue => "ISS",
        }
    }
}

/// Format a business key: `PREFIX-YYYY-NNN` (sequence zero-padded to 3)
pub fn format_document_number(kind: DocumentKind, year: i32, sequence: i64) -> String {
    format!("{}-{:04}-{:03}", kind.prefix(), year, sequence)
}

// ============================================================================
// Posted Lines
// ============================================================================

/// Every posted quantity must be strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::InvalidQuantity(quantity));
    }
    Ok(())
}

/// Returns the first item that appears on more than one line
pub fn find_duplicate_item<I>(items: I) -> Option<Uuid>
where
    I: IntoIterator<Item = Uuid>,
{
    let mut seen = HashSet::new();
    items.into_iter().find(|id| !seen.insert(*id))
}
