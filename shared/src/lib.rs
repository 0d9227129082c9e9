//! Shared domain rules for the Stock Valuation Engine
//!
//! Everything in this crate is pure: no I/O, no clocks beyond what callers
//! pass in. The backend drives these rules inside database transactions.

pub mod error;
pub mod models;
pub mod money;
pub mod reconciliation;
pub mod types;
pub mod validation;
pub mod valuation;

pub use error::*;
pub use models::*;
pub use money::*;
pub use reconciliation::*;
pub use types::*;
pub use validation::*;
pub use valuation::*;
