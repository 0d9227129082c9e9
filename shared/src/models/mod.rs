//! Domain models for the Stock Valuation Engine

mod ncr;
mod period;
mod stock;
mod transfer;

pub use ncr::*;
pub use period::*;
pub use stock::*;
pub use transfer::*;
