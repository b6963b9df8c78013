//! Order fulfillment worker.
//!
//! Runs acquire → process → complete/fail against the job queue, safe as
//! any number of parallel instances: all coordination lives in the durable
//! queue and the database's row locking, never in process memory. The
//! fulfillment transaction is the only place inventory and reservations are
//! mutated.

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::cart::{self, CartStatus, Entity as CartEntity};
use crate::entities::cart_item::{self, Entity as CartItemEntity};
use crate::entities::job::{self, JobStatus, JOB_TYPE_FULFILL_ORDER};
use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::entities::payment_intent::{self, Entity as PaymentIntentEntity, IntentStatus};
use crate::entities::product_variant::{self, Entity as ProductVariantEntity};
use crate::entities::webhook_event::{self, Entity as WebhookEventEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{PaymentGateway, PaymentMethod};
use crate::services::job_queue::JobQueueService;
use crate::services::reservations::{confirm_cart_reservations, expire_overdue_cart_reservations};
use crate::services::webhooks::FulfillOrderPayload;

/// How often a lost conditional update is retried inside one transaction
/// before the contention is handed back to the queue as a transient failure.
const OCC_RETRIES: usize = 3;

/// Result of handling one job, surfaced by the manual drain endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobOutcome {
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<Uuid>,
    /// fulfilled | already_fulfilled | payment_failed | requeued | dead
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum Fulfillment {
    Created { order_number: String, order_id: Uuid },
    AlreadyFulfilled,
    /// Provider reported a failed payment; the intent is closed, no order.
    IntentFailed,
}

/// Failure classification driving the queue transition.
enum FulfillmentError {
    /// Data-consistency bug (intent row missing, unparseable payload).
    /// Dead-lettered immediately at alert severity, never retried.
    Fatal(String),
    /// Business outcome that retrying cannot change (stock gone,
    /// reservation expired, amount mismatch).
    Terminal(ServiceError),
    /// Infrastructure hiccup worth a backoff retry.
    Transient(ServiceError),
}

fn transient(err: impl Into<ServiceError>) -> FulfillmentError {
    FulfillmentError::Transient(err.into())
}

#[derive(Clone)]
pub struct OrderWorkerService {
    db: Arc<DatabaseConnection>,
    queue: JobQueueService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    lease_timeout: Duration,
    verify_with_provider: bool,
}

impl OrderWorkerService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: JobQueueService,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        lease_timeout: Duration,
        verify_with_provider: bool,
    ) -> Self {
        Self {
            db,
            queue,
            gateway,
            event_sender,
            lease_timeout,
            verify_with_provider,
        }
    }

    pub fn queue(&self) -> &JobQueueService {
        &self.queue
    }

    /// Acquires and processes at most one job. `Ok(None)` means the queue had
    /// no eligible work, which is a normal outcome, not an error.
    #[instrument(skip(self))]
    pub async fn process_one(&self, worker_id: &str) -> Result<Option<JobOutcome>, ServiceError> {
        let Some(job) = self
            .queue
            .acquire_next_job(worker_id, self.lease_timeout)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(self.process_job(worker_id, job).await))
    }

    /// Drains up to `max_jobs` jobs, e.g. from the cron-triggered endpoint.
    #[instrument(skip(self))]
    pub async fn drain(
        &self,
        worker_id: &str,
        max_jobs: usize,
    ) -> Result<Vec<JobOutcome>, ServiceError> {
        let mut outcomes = Vec::new();
        for _ in 0..max_jobs {
            match self.process_one(worker_id).await? {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        Ok(outcomes)
    }

    /// Long-running polling loop; run one task per configured worker.
    pub async fn run_loop(self, worker_id: String, poll_interval: Duration) {
        info!(worker_id = %worker_id, "order worker loop started");
        loop {
            match self.process_one(&worker_id).await {
                Ok(Some(outcome)) => {
                    info!(
                        worker_id = %worker_id,
                        job_id = %outcome.job_id,
                        status = %outcome.status,
                        "processed job"
                    );
                }
                Ok(None) => {
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "worker poll failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    async fn process_job(&self, worker_id: &str, job: job::Model) -> JobOutcome {
        let job_id = job.id;

        if job.job_type != JOB_TYPE_FULFILL_ORDER {
            return self
                .dead_letter(
                    worker_id,
                    job_id,
                    None,
                    format!("unknown job type: {}", job.job_type),
                )
                .await;
        }

        let payload: FulfillOrderPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                return self
                    .dead_letter(worker_id, job_id, None, format!("unparseable payload: {}", e))
                    .await;
            }
        };
        let intent_id = payload.payment_intent_id;

        match self.fulfill(&payload).await {
            Ok(Fulfillment::Created {
                order_number,
                order_id,
            }) => {
                counter!("pasal_orders.created", 1);
                let _ = self.event_sender.send(Event::OrderCreated(order_id)).await;
                self.finish(worker_id, job_id, intent_id, "fulfilled", Some(order_number))
                    .await
            }
            Ok(Fulfillment::AlreadyFulfilled) => {
                // A prior run created the order but crashed before completing
                // the job; completing now is the idempotent path.
                self.finish(worker_id, job_id, intent_id, "already_fulfilled", None)
                    .await
            }
            Ok(Fulfillment::IntentFailed) => {
                self.finish(worker_id, job_id, intent_id, "payment_failed", None)
                    .await
            }
            Err(FulfillmentError::Fatal(reason)) => {
                error!(
                    job_id = %job_id,
                    intent_id = %intent_id,
                    reason = %reason,
                    "integrity failure during fulfillment; operator attention required"
                );
                counter!("pasal_jobs.integrity_failures", 1);
                self.dead_letter(worker_id, job_id, Some(intent_id), reason).await
            }
            Err(FulfillmentError::Terminal(err)) => {
                let reason = err.to_string();
                let _ = self
                    .event_sender
                    .send(Event::OrderFulfillmentFailed {
                        intent_id,
                        reason: reason.clone(),
                    })
                    .await;
                self.dead_letter(worker_id, job_id, Some(intent_id), reason).await
            }
            Err(FulfillmentError::Transient(err)) => {
                let reason = err.to_string();
                match self.queue.fail_job(job_id, worker_id, &reason, true).await {
                    Ok(JobStatus::Queued) => JobOutcome {
                        job_id,
                        payment_intent_id: Some(intent_id),
                        status: "requeued".to_string(),
                        order_number: None,
                        error: Some(reason),
                    },
                    Ok(_) => {
                        let _ = self
                            .event_sender
                            .send(Event::JobDeadLettered {
                                job_id,
                                reason: reason.clone(),
                            })
                            .await;
                        JobOutcome {
                            job_id,
                            payment_intent_id: Some(intent_id),
                            status: "dead".to_string(),
                            order_number: None,
                            error: Some(reason),
                        }
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "fail_job rejected");
                        JobOutcome {
                            job_id,
                            payment_intent_id: Some(intent_id),
                            status: "lease_lost".to_string(),
                            order_number: None,
                            error: Some(reason),
                        }
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        worker_id: &str,
        job_id: Uuid,
        intent_id: Uuid,
        status: &str,
        order_number: Option<String>,
    ) -> JobOutcome {
        if let Err(e) = self.queue.complete_job(job_id, worker_id).await {
            // The fulfillment transaction already committed; a reclaimed
            // lease here is harmless because the next holder hits the
            // idempotent already-confirmed path.
            warn!(job_id = %job_id, error = %e, "complete_job rejected after commit");
        }
        JobOutcome {
            job_id,
            payment_intent_id: Some(intent_id),
            status: status.to_string(),
            order_number,
            error: None,
        }
    }

    async fn dead_letter(
        &self,
        worker_id: &str,
        job_id: Uuid,
        intent_id: Option<Uuid>,
        reason: String,
    ) -> JobOutcome {
        match self.queue.fail_job(job_id, worker_id, &reason, false).await {
            Ok(_) => {
                let _ = self
                    .event_sender
                    .send(Event::JobDeadLettered {
                        job_id,
                        reason: reason.clone(),
                    })
                    .await;
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "dead-letter rejected"),
        }
        JobOutcome {
            job_id,
            payment_intent_id: intent_id,
            status: "dead".to_string(),
            order_number: None,
            error: Some(reason),
        }
    }

    async fn fulfill(&self, payload: &FulfillOrderPayload) -> Result<Fulfillment, FulfillmentError> {
        let intent = PaymentIntentEntity::find_by_id(payload.payment_intent_id)
            .one(&*self.db)
            .await
            .map_err(transient)?
            .ok_or_else(|| {
                FulfillmentError::Fatal(format!(
                    "payment intent {} referenced by job does not exist",
                    payload.payment_intent_id
                ))
            })?;

        if intent.status == IntentStatus::Confirmed.as_str() {
            return Ok(Fulfillment::AlreadyFulfilled);
        }

        if payload.webhook.event_type == "payment.failed" {
            self.close_intent(&intent, IntentStatus::Failed)
                .await
                .map_err(transient)?;
            return Ok(Fulfillment::IntentFailed);
        }

        self.verify_settlement(&intent, payload).await?;

        match self.materialize_order(&intent, payload).await {
            Err(FulfillmentError::Terminal(ServiceError::ReservationExpired(id))) => {
                // The aborted transaction rolled back the in-txn expiry flip;
                // redo it here so lookups observe expired, not a stale hold.
                if let Err(e) =
                    expire_overdue_cart_reservations(&*self.db, intent.cart_id, Utc::now()).await
                {
                    warn!(cart_id = %intent.cart_id, error = %e, "failed to expire stale holds");
                }
                Err(FulfillmentError::Terminal(ServiceError::ReservationExpired(id)))
            }
            other => other,
        }
    }

    /// Defends against forged or stale webhook payloads: ingestion only
    /// checked the signature, not settlement state. Any amount or currency
    /// disagreement is terminal.
    async fn verify_settlement(
        &self,
        intent: &payment_intent::Model,
        payload: &FulfillOrderPayload,
    ) -> Result<(), FulfillmentError> {
        let method = PaymentMethod::from_str(&intent.provider);
        let use_provider = self.verify_with_provider && method != Some(PaymentMethod::Cod);

        let (amount, currency, settled) = if use_provider {
            let verification = self
                .gateway
                .verify_payment(intent)
                .await
                .map_err(transient)?;
            (
                verification.amount_minor,
                verification.currency,
                verification.settled,
            )
        } else {
            (
                payload.webhook.amount,
                payload.webhook.currency.clone(),
                true,
            )
        };

        if !settled {
            return Err(FulfillmentError::Terminal(
                ServiceError::PaymentVerificationFailed(
                    "provider reports payment not settled".to_string(),
                ),
            ));
        }
        if amount != intent.amount_minor || !currency.eq_ignore_ascii_case(&intent.currency) {
            return Err(FulfillmentError::Terminal(
                ServiceError::PaymentVerificationFailed(format!(
                    "amount mismatch: intent {} {} vs reported {} {}",
                    intent.amount_minor, intent.currency, amount, currency
                )),
            ));
        }
        Ok(())
    }

    /// The single atomic transaction at the heart of the pipeline: decrement
    /// inventory with OCC, confirm reservations, insert the order, clear the
    /// cart, confirm the intent. Nothing partial ever commits.
    async fn materialize_order(
        &self,
        intent: &payment_intent::Model,
        payload: &FulfillOrderPayload,
    ) -> Result<Fulfillment, FulfillmentError> {
        let now = Utc::now();
        let txn = self.db.begin().await.map_err(transient)?;

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(intent.cart_id))
            .all(&txn)
            .await
            .map_err(transient)?;

        let order_id = Uuid::new_v4();
        let order_number = format!(
            "ORD-{}",
            order_id.simple().to_string()[..8].to_uppercase()
        );

        let mut subtotal: i64 = 0;
        let mut order_items = Vec::with_capacity(items.len());
        for item in &items {
            let variant = self.decrement_stock(&txn, item).await?;
            subtotal += item.unit_price_minor * i64::from(item.quantity);
            order_items.push(order_item::ActiveModel {
                order_id: Set(order_id),
                variant_id: Set(item.variant_id),
                sku: Set(variant.sku),
                name: Set(variant.name),
                quantity: Set(item.quantity),
                unit_price_minor: Set(item.unit_price_minor),
                total_minor: Set(item.unit_price_minor * i64::from(item.quantity)),
                fulfillment_status: Set("unfulfilled".to_string()),
                ..Default::default()
            });
        }

        // The intent total was computed from this cart; a shortfall means the
        // cart was mutated after checkout and the money no longer matches.
        let shipping_fee = intent.amount_minor - subtotal;
        if shipping_fee < 0 {
            return Err(FulfillmentError::Terminal(
                ServiceError::PaymentVerificationFailed(
                    "cart total exceeds settled amount".to_string(),
                ),
            ));
        }

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            payment_intent_id: Set(intent.id),
            customer_id: Set(intent.customer_id),
            status: Set(OrderStatus::Confirmed.as_str().to_string()),
            subtotal_minor: Set(subtotal),
            shipping_fee_minor: Set(shipping_fee),
            discount_minor: Set(0),
            total_minor: Set(intent.amount_minor),
            currency: Set(intent.currency.clone()),
            shipping_address: Set(intent.shipping_address.clone()),
            ..Default::default()
        };

        match order_model.insert(&txn).await {
            Ok(_) => {}
            Err(err) => {
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    // A concurrent worker materialized this intent first.
                    return Ok(Fulfillment::AlreadyFulfilled);
                }
                return Err(transient(err));
            }
        }

        for item in order_items {
            item.insert(&txn).await.map_err(transient)?;
        }

        confirm_cart_reservations(&txn, intent.cart_id, order_id, now)
            .await
            .map_err(|e| match e {
                ServiceError::ReservationExpired(_) => FulfillmentError::Terminal(e),
                other => transient(other),
            })?;

        CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(intent.cart_id))
            .exec(&txn)
            .await
            .map_err(transient)?;
        CartEntity::update_many()
            .col_expr(
                cart::Column::Status,
                Expr::value(CartStatus::Converted.as_str()),
            )
            .col_expr(cart::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(cart::Column::Id.eq(intent.cart_id))
            .exec(&txn)
            .await
            .map_err(transient)?;

        PaymentIntentEntity::update_many()
            .col_expr(
                payment_intent::Column::Status,
                Expr::value(IntentStatus::Confirmed.as_str()),
            )
            .col_expr(payment_intent::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment_intent::Column::Id.eq(intent.id))
            .exec(&txn)
            .await
            .map_err(transient)?;

        WebhookEventEntity::update_many()
            .col_expr(
                webhook_event::Column::ProcessedAt,
                Expr::value(Some(now)),
            )
            .filter(webhook_event::Column::Id.eq(payload.webhook_event_id))
            .exec(&txn)
            .await
            .map_err(transient)?;

        txn.commit().await.map_err(transient)?;

        info!(
            order_id = %order_id,
            order_number = %order_number,
            intent_id = %intent.id,
            "order materialized"
        );

        Ok(Fulfillment::Created {
            order_number,
            order_id,
        })
    }

    /// Optimistic decrement: `available -= qty` only while `available >= qty`
    /// and the version still matches the read. A lost race re-reads and
    /// retries; genuine shortage aborts the transaction.
    async fn decrement_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        item: &cart_item::Model,
    ) -> Result<product_variant::Model, FulfillmentError> {
        for _ in 0..OCC_RETRIES {
            let variant = ProductVariantEntity::find_by_id(item.variant_id)
                .one(conn)
                .await
                .map_err(transient)?
                .ok_or_else(|| {
                    FulfillmentError::Fatal(format!(
                        "cart references missing variant {}",
                        item.variant_id
                    ))
                })?;

            if variant.available < item.quantity {
                return Err(FulfillmentError::Terminal(ServiceError::InsufficientStock(
                    variant.sku,
                )));
            }

            let updated = ProductVariantEntity::update_many()
                .col_expr(
                    product_variant::Column::Available,
                    Expr::col(product_variant::Column::Available).sub(item.quantity),
                )
                .col_expr(
                    product_variant::Column::Version,
                    Expr::col(product_variant::Column::Version).add(1),
                )
                .col_expr(
                    product_variant::Column::UpdatedAt,
                    Expr::value(Some(Utc::now())),
                )
                .filter(product_variant::Column::Id.eq(variant.id))
                .filter(product_variant::Column::Available.gte(item.quantity))
                .filter(product_variant::Column::Version.eq(variant.version))
                .exec(conn)
                .await
                .map_err(transient)?;

            if updated.rows_affected == 1 {
                return Ok(variant);
            }
            // Version moved under us; loop re-reads the current row.
        }

        Err(transient(ServiceError::Conflict(format!(
            "contended inventory row for variant {}",
            item.variant_id
        ))))
    }

    async fn close_intent(
        &self,
        intent: &payment_intent::Model,
        status: IntentStatus,
    ) -> Result<(), ServiceError> {
        PaymentIntentEntity::update_many()
            .col_expr(
                payment_intent::Column::Status,
                Expr::value(status.as_str()),
            )
            .col_expr(
                payment_intent::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(payment_intent::Column::Id.eq(intent.id))
            .filter(payment_intent::Column::Status.ne(IntentStatus::Confirmed.as_str()))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
