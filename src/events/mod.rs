use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

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

// Domain events emitted by the fulfillment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, variant_id: Uuid },
    CartCleared(Uuid),

    // Reservation events
    ReservationHeld { reservation_id: Uuid, cart_id: Uuid },
    ReservationRenewed(Uuid),
    ReservationReleased(Uuid),
    ReservationExpired(Uuid),
    ReservationConfirmed { reservation_id: Uuid, order_id: Uuid },

    // Checkout / payment events
    PaymentIntentCreated {
        intent_id: Uuid,
        provider: String,
        amount_minor: i64,
    },
    WebhookAccepted {
        provider: String,
        event_id: String,
    },
    WebhookReplayed {
        provider: String,
        event_id: String,
    },

    // Fulfillment events
    JobEnqueued { job_id: Uuid, intent_id: Uuid },
    JobDeadLettered { job_id: Uuid, reason: String },
    OrderCreated(Uuid),
    OrderFulfillmentFailed { intent_id: Uuid, reason: String },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// Processes incoming events. Today this is a structured-logging sink; the
// notification fan-out (email/SMS on OrderCreated) hangs off this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "order created");
            }
            Event::OrderFulfillmentFailed { intent_id, reason } => {
                warn!(intent_id = %intent_id, reason = %reason, "order fulfillment failed");
            }
            Event::JobDeadLettered { job_id, reason } => {
                warn!(job_id = %job_id, reason = %reason, "job dead-lettered");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
