//! Webhook ingestion: verify, deduplicate, enqueue.
//!
//! The only synchronous rejection is a bad signature; everything past that
//! point must come back 2xx quickly. Durability comes from doing the ledger
//! insert and the job enqueue in one transaction, so a 5xx (storage down)
//! is always safe for the provider to retry.

use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::payment_intent::{self, Entity as PaymentIntentEntity, IntentStatus};
use crate::entities::webhook_event::{self, Entity as WebhookEventEntity};
use crate::entities::job::JOB_TYPE_FULFILL_ORDER;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::PaymentMethod;
use crate::services::job_queue;

type HmacSha256 = Hmac<Sha256>;

/// Provider notification body for `POST /webhooks/fulfill-order`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookPayload {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payment_intent_id: Uuid,
    /// Claimed settled amount in minor units
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

/// Idempotency contract visible to the provider: repeat deliveries of the
/// same event_id get byte-identical responses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    pub success: bool,
    pub event_id: String,
}

/// Job payload carried from ingestion to the order worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillOrderPayload {
    pub payment_intent_id: Uuid,
    pub webhook_event_id: Uuid,
    pub webhook: WebhookPayload,
}

#[derive(Clone)]
pub struct WebhookIngestService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    config: AppConfig,
}

impl WebhookIngestService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, config: AppConfig) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Ingests one provider callback.
    ///
    /// 1. Verify the HMAC signature (or the mock header in test mode);
    ///    failure is the only hard rejection that never reaches the queue.
    /// 2. Insert (provider, event_id) into the idempotency ledger. A unique
    ///    violation means replay: return the stored outcome unchanged.
    /// 3. First delivery: enqueue the fulfillment job in the same
    ///    transaction and move the intent to pending_webhook.
    #[instrument(skip(self, raw_body, signature, mock_signature))]
    pub async fn ingest(
        &self,
        signature: Option<&str>,
        mock_signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<WebhookResponse, ServiceError> {
        let payload: WebhookPayload = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::ValidationError(format!("invalid webhook body: {}", e)))?;

        if PaymentMethod::from_str(&payload.provider).is_none() {
            return Err(ServiceError::ValidationError(format!(
                "unknown provider: {}",
                payload.provider
            )));
        }

        let secret = self.config.webhook_secret_for(&payload.provider);
        if !self.verify_signature(secret, signature, mock_signature, raw_body) {
            warn!(provider = %payload.provider, "webhook signature verification failed");
            return Err(ServiceError::InvalidSignature);
        }

        let response = WebhookResponse {
            success: true,
            event_id: payload.event_id.clone(),
        };

        let txn = self.db.begin().await?;

        let event_row = webhook_event::ActiveModel {
            provider: Set(payload.provider.clone()),
            event_id: Set(payload.event_id.clone()),
            payload: Set(serde_json::to_value(&payload)?),
            outcome: Set(serde_json::to_value(&response)?),
            processed_at: Set(None),
            ..Default::default()
        };

        let event_row = match event_row.insert(&txn).await {
            Ok(row) => row,
            Err(err) => {
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    // Duplicate delivery; drop the transaction and answer with
                    // the recorded outcome. No second job is ever created.
                    drop(txn);
                    return self.replay(&payload).await;
                }
                return Err(err.into());
            }
        };

        let job_payload = FulfillOrderPayload {
            payment_intent_id: payload.payment_intent_id,
            webhook_event_id: event_row.id,
            webhook: payload.clone(),
        };
        let job = job_queue::enqueue(
            &txn,
            JOB_TYPE_FULFILL_ORDER,
            serde_json::to_value(&job_payload)?,
            self.config.job_max_attempts,
        )
        .await?;

        // First webhook moves a freshly created intent into pending_webhook;
        // terminal intents are left alone (the worker resolves them).
        PaymentIntentEntity::update_many()
            .col_expr(
                payment_intent::Column::Status,
                sea_orm::sea_query::Expr::value(IntentStatus::PendingWebhook.as_str()),
            )
            .filter(payment_intent::Column::Id.eq(payload.payment_intent_id))
            .filter(payment_intent::Column::Status.eq(IntentStatus::Created.as_str()))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(
            provider = %payload.provider,
            event_id = %payload.event_id,
            job_id = %job.id,
            "webhook accepted and fulfillment job enqueued"
        );
        let _ = self
            .event_sender
            .send(Event::WebhookAccepted {
                provider: payload.provider.clone(),
                event_id: payload.event_id.clone(),
            })
            .await;
        let _ = self
            .event_sender
            .send(Event::JobEnqueued {
                job_id: job.id,
                intent_id: payload.payment_intent_id,
            })
            .await;

        Ok(response)
    }

    /// Idempotent replay: answer with the outcome stored on first delivery.
    async fn replay(&self, payload: &WebhookPayload) -> Result<WebhookResponse, ServiceError> {
        let existing = WebhookEventEntity::find()
            .filter(webhook_event::Column::Provider.eq(payload.provider.clone()))
            .filter(webhook_event::Column::EventId.eq(payload.event_id.clone()))
            .one(&*self.db)
            .await?;

        info!(
            provider = %payload.provider,
            event_id = %payload.event_id,
            "duplicate webhook delivery; returning recorded outcome"
        );
        let _ = self
            .event_sender
            .send(Event::WebhookReplayed {
                provider: payload.provider.clone(),
                event_id: payload.event_id.clone(),
            })
            .await;

        match existing {
            Some(row) => Ok(serde_json::from_value(row.outcome)?),
            // The first delivery's transaction is still in flight; the
            // contract response is identical either way.
            None => Ok(WebhookResponse {
                success: true,
                event_id: payload.event_id.clone(),
            }),
        }
    }

    fn verify_signature(
        &self,
        secret: &str,
        signature: Option<&str>,
        mock_signature: Option<&str>,
        raw_body: &[u8],
    ) -> bool {
        if self.config.webhook_test_mode {
            if let Some(mock) = mock_signature {
                return constant_time_eq(mock, secret);
            }
        }

        let Some(signature) = signature else {
            return false;
        };
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());
        constant_time_eq(&expected, signature)
    }
}

/// Computes the hex HMAC-SHA256 signature a provider (or test) should send.
pub fn sign_payload(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
