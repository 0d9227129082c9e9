//! Outbound domain events and the notifier that consumes them
//!
//! Services publish after their transaction commits. Publishing never blocks
//! and never fails the operation: if the notifier has fallen behind and the
//! channel is full, the event is dropped with a warning.

use rust_decimal::Decimal;
use serde::Serialize;
use shared::NcrType;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Something downstream parties may want to hear about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    NcrCreated {
        ncr_id: Uuid,
        ncr_no: String,
        location_id: Uuid,
        ncr_type: NcrType,
        value: Decimal,
        auto_generated: bool,
    },
    DeliveryPosted {
        delivery_id: Uuid,
        delivery_no: String,
        location_id: Uuid,
        total_amount: Decimal,
        variance_ncrs: usize,
    },
    TransferCompleted {
        transfer_id: Uuid,
        transfer_no: String,
        from_location_id: Uuid,
        to_location_id: Uuid,
        total_value: Decimal,
    },
    TransferRejected {
        transfer_id: Uuid,
        transfer_no: String,
        requested_by: Uuid,
    },
    PeriodClosed {
        period_id: Uuid,
        locations: usize,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::NcrCreated { .. } => "ncr_created",
            DomainEvent::DeliveryPosted { .. } => "delivery_posted",
            DomainEvent::TransferCompleted { .. } => "transfer_completed",
            DomainEvent::TransferRejected { .. } => "transfer_rejected",
            DomainEvent::PeriodClosed { .. } => "period_closed",
        }
    }
}

/// Sending half handed to every service
#[derive(Clone, Debug)]
pub struct EventPublisher {
    sender: mpsc::Sender<DomainEvent>,
}

impl EventPublisher {
    /// Create a publisher and the receiver its notifier drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        if let Err(err) = self.sender.try_send(event) {
            tracing::warn!(event = name, "Dropping domain event: {}", err);
        }
    }

    pub fn publish_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = DomainEvent>,
    {
        for event in events {
            self.publish(event);
        }
    }
}

/// Where the notifier hands events off to (mail relay, chat hook, ...)
pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Writes each event to the log as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(event = event.name(), %payload, "Notification dispatched");
        Ok(())
    }
}

/// Drain events until every publisher is dropped. Sink failures are logged
/// and skipped.
pub async fn run_notifier<S>(mut receiver: mpsc::Receiver<DomainEvent>, sink: S)
where
    S: NotificationSink,
{
    while let Some(event) = receiver.recv().await {
        if let Err(err) = sink.deliver(&event) {
            tracing::warn!(event = event.name(), "Notification delivery failed: {:#}", err);
        }
    }
    tracing::info!("Notifier stopped");
}
