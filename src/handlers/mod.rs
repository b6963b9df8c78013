pub mod carts;
pub mod health;
pub mod orders;
pub mod payment_intents;
pub mod reservations;
pub mod webhooks;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::payments::PaymentGateway;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<crate::services::carts::CartService>,
    pub reservations: Arc<crate::services::reservations::ReservationService>,
    pub payment_intents: Arc<crate::services::payment_intents::PaymentIntentService>,
    pub webhooks: Arc<crate::services::webhooks::WebhookIngestService>,
    pub job_queue: Arc<crate::services::job_queue::JobQueueService>,
    pub order_worker: Arc<crate::services::order_worker::OrderWorkerService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let carts = Arc::new(crate::services::carts::CartService::new(
            db.clone(),
            event_sender.clone(),
            config.default_currency.clone(),
        ));
        let reservations = Arc::new(crate::services::reservations::ReservationService::new(
            db.clone(),
            event_sender.clone(),
            config.reservation_ttl_secs,
        ));
        let payment_intents = Arc::new(crate::services::payment_intents::PaymentIntentService::new(
            db.clone(),
            event_sender.clone(),
            gateway.clone(),
        ));
        let webhooks = Arc::new(crate::services::webhooks::WebhookIngestService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let job_queue = Arc::new(crate::services::job_queue::JobQueueService::new(
            db.clone(),
            config.job_max_attempts,
        ));
        let order_worker = Arc::new(crate::services::order_worker::OrderWorkerService::new(
            db,
            (*job_queue).clone(),
            gateway,
            event_sender,
            Duration::from_secs(config.lease_timeout_secs),
            config.payment_verify_mode == "provider",
        ));

        Self {
            carts,
            reservations,
            payment_intents,
            webhooks,
            job_queue,
            order_worker,
        }
    }
}
