use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::booking_reservation::{
    self, Entity as ReservationEntity, ReservationStatus,
};
use crate::entities::cart::{CartStatus, Entity as CartEntity};
use crate::entities::cart_item::{self, Entity as CartItemEntity};
use crate::entities::order::{self, Entity as OrderEntity};
use crate::entities::payment_intent::{self, IntentStatus};
use crate::entities::product_variant::Entity as ProductVariantEntity;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{PaymentGateway, PaymentMethod};
use crate::services::carts::subtotal_minor;

/// Flat delivery fee applied when the cart ships physical goods, minor units.
const SHIPPING_FLAT_MINOR: i64 = 10_000;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateIntentInput {
    pub cart_id: Uuid,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub payment_method: PaymentMethod,
}

/// Checkout handoff returned to the storefront.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateIntentOutcome {
    pub intent_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub form_fields: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub redirect_to_success: bool,
}

/// Answer for the client poller.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderStatusView {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
}

/// Service owning the checkout-attempt lifecycle up to the webhook.
#[derive(Clone)]
pub struct PaymentIntentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentIntentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Validates the cart, computes the authoritative total server-side, and
    /// opens a provider session. Inventory is untouched here: stock is only
    /// reserved when the order worker fulfills, so abandoned checkouts never
    /// hold stock hostage.
    #[instrument(skip(self, input), fields(cart_id = %input.cart_id, method = input.payment_method.as_str()))]
    pub async fn create_intent(
        &self,
        input: CreateIntentInput,
    ) -> Result<CreateIntentOutcome, ServiceError> {
        let cart = CartEntity::find_by_id(input.cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", input.cart_id)))?;

        if cart.status != CartStatus::Active.as_str() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart {} is not active",
                cart.id
            )));
        }

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;

        let now = Utc::now();
        let reservations = ReservationEntity::find()
            .filter(booking_reservation::Column::CartId.eq(cart.id))
            .filter(
                booking_reservation::Column::Status.ne(ReservationStatus::Released.as_str()),
            )
            .all(&*self.db)
            .await?;

        if items.is_empty() && reservations.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        // Availability is advisory here; the worker's conditional decrement
        // is the real arbiter. Rejecting early just spares the customer a
        // doomed redirect.
        let mut out_of_stock = Vec::new();
        for item in &items {
            let variant = ProductVariantEntity::find_by_id(item.variant_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product variant {} not found", item.variant_id))
                })?;
            if variant.available < item.quantity {
                out_of_stock.push(variant.sku);
            }
        }
        if !out_of_stock.is_empty() {
            return Err(ServiceError::InsufficientStock(out_of_stock.join(", ")));
        }

        for reservation in &reservations {
            let held = ReservationStatus::from_str(&reservation.status)
                == Some(ReservationStatus::Held);
            if !held || reservation.is_expired(now) {
                return Err(ServiceError::ReservationExpired(reservation.id.to_string()));
            }
        }

        // Server-side total from price snapshots; any client-sent total is a
        // display hint only.
        let subtotal = subtotal_minor(&items);
        let shipping_fee = if items.is_empty() { 0 } else { SHIPPING_FLAT_MINOR };
        let amount = subtotal + shipping_fee;

        let intent = payment_intent::ActiveModel {
            customer_id: Set(cart.customer_id),
            cart_id: Set(cart.id),
            provider: Set(input.payment_method.as_str().to_string()),
            amount_minor: Set(amount),
            currency: Set(cart.currency.clone()),
            status: Set(IntentStatus::Created.as_str().to_string()),
            provider_ref: Set(None),
            shipping_address: Set(input.shipping_address),
            ..Default::default()
        };
        let intent = intent.insert(&*self.db).await?;

        let outcome = if input.payment_method.requires_redirect() {
            let session = self.gateway.open_session(&intent).await?;

            let mut active: payment_intent::ActiveModel = intent.clone().into();
            active.provider_ref = Set(Some(session.provider_ref.clone()));
            active.status = Set(IntentStatus::PendingWebhook.as_str().to_string());
            active.update(&*self.db).await?;

            CreateIntentOutcome {
                intent_id: intent.id,
                payment_url: session.payment_url,
                form_fields: session.form_fields,
                redirect_to_success: false,
            }
        } else {
            // COD: no external session. The intent waits for the internally
            // signed confirmation webhook from the storefront.
            let mut active: payment_intent::ActiveModel = intent.clone().into();
            active.status = Set(IntentStatus::PendingWebhook.as_str().to_string());
            active.update(&*self.db).await?;

            CreateIntentOutcome {
                intent_id: intent.id,
                payment_url: None,
                form_fields: None,
                redirect_to_success: true,
            }
        };

        info!(intent_id = %intent.id, amount_minor = amount, "payment intent created");
        let _ = self
            .event_sender
            .send(Event::PaymentIntentCreated {
                intent_id: intent.id,
                provider: intent.provider.clone(),
                amount_minor: amount,
            })
            .await;

        Ok(outcome)
    }

    /// Polled by the storefront until the order shows up. Correctness never
    /// depends on this: if the poller gives up, the order still materializes
    /// and is discoverable later.
    #[instrument(skip(self))]
    pub async fn order_status(
        &self,
        payment_intent_id: Uuid,
    ) -> Result<OrderStatusView, ServiceError> {
        let found = OrderEntity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?;

        Ok(match found {
            Some(order) => OrderStatusView {
                exists: true,
                order_number: Some(order.order_number),
            },
            None => OrderStatusView {
                exists: false,
                order_number: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serialization_omits_empty_fields() {
        let outcome = CreateIntentOutcome {
            intent_id: Uuid::new_v4(),
            payment_url: None,
            form_fields: None,
            redirect_to_success: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json.get("redirect_to_success"), Some(&serde_json::json!(true)));
        assert!(json.get("payment_url").is_none());

        let outcome = CreateIntentOutcome {
            intent_id: Uuid::new_v4(),
            payment_url: Some("https://pay.example.test/x".into()),
            form_fields: None,
            redirect_to_success: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("payment_url").is_some());
        assert!(json.get("redirect_to_success").is_none());
    }
}
