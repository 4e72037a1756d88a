use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Domain events emitted after a committed inventory mutation.
/// Delivery is best-effort; a full channel never fails the mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    InventoryReceived {
        store_id: i64,
        variant_id: i64,
        quantity: Decimal,
        lot_id: Uuid,
        movement_id: Uuid,
    },
    InventoryAdjusted {
        store_id: i64,
        variant_id: i64,
        change: Decimal,
        new_quantity: Decimal,
        movement_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumer loop for domain events. Downstream integrations (reporting,
/// reorder alerts) subscribe here; the default consumer just logs.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::InventoryReceived {
                store_id,
                variant_id,
                quantity,
                ..
            } => {
                info!(store_id, variant_id, %quantity, "inventory received");
            }
            Event::InventoryAdjusted {
                store_id,
                variant_id,
                change,
                new_quantity,
                ..
            } => {
                info!(store_id, variant_id, %change, %new_quantity, "inventory adjusted");
            }
        }
        debug!(?event, "event processed");
    }
}
