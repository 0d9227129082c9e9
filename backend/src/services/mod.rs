//! Business logic services for the Stock Valuation Engine

pub mod delivery;
pub mod issue;
pub mod ledger;
pub mod ncr;
pub mod notification;
pub mod period;
pub mod reconciliation;
pub mod sequence;
pub mod transfer;

pub use delivery::DeliveryService;
pub use issue::IssueService;
pub use ledger::StockService;
pub use ncr::NcrService;
pub use notification::{DomainEvent, EventPublisher, LogSink, NotificationSink};
pub use period::PeriodService;
pub use reconciliation::ReconciliationService;
pub use transfer::TransferService;
