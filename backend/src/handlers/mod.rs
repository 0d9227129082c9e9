//! HTTP request handlers

pub mod health;
pub mod ncr;
pub mod period;
pub mod reconciliation;
pub mod stock;
pub mod transfer;

pub use health::health_check;
pub use ncr::*;
pub use period::*;
pub use reconciliation::*;
pub use stock::*;
pub use transfer::*;
