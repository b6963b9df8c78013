use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::cart::{self, CartStatus, Entity as CartEntity};
use crate::entities::cart_item::{self, Entity as CartItemEntity};
use crate::entities::product_variant::{self, Entity as ProductVariantEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Cart contents with server-side totals, as consumed by the storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: String,
    pub currency: String,
    pub items: Vec<CartItemView>,
    pub subtotal_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemView {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub unit_price_minor: i64,
    pub line_total_minor: i64,
}

/// Sums line totals in minor units. Money never leaves integer arithmetic.
pub fn subtotal_minor(items: &[cart_item::Model]) -> i64 {
    items
        .iter()
        .map(|item| item.unit_price_minor * i64::from(item.quantity))
        .sum()
}

/// Service for managing customer carts.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_currency: String,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_currency,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_cart(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        let model = cart::ActiveModel {
            customer_id: Set(customer_id),
            status: Set(CartStatus::Active.as_str().to_string()),
            currency: Set(self.default_currency.clone()),
            ..Default::default()
        };
        let created = model.insert(&*self.db).await?;

        let _ = self.event_sender.send(Event::CartCreated(created.id)).await;

        Ok(created)
    }

    /// Adds a line item, snapshotting the variant's current price. Adding the
    /// same variant again merges into the existing line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }

        let cart = self.require_active_cart(cart_id).await?;

        let variant = ProductVariantEntity::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product variant {} not found", variant_id))
            })?;

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db)
            .await?;

        let item = match existing {
            Some(line) => {
                let merged = line.quantity + quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(merged);
                active.update(&*self.db).await?
            }
            None => {
                let active = cart_item::ActiveModel {
                    cart_id: Set(cart.id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    unit_price_minor: Set(variant.price_minor),
                    ..Default::default()
                };
                active.insert(&*self.db).await?
            }
        };

        info!(cart_id = %cart_id, variant_id = %variant_id, quantity, "added cart item");
        let _ = self
            .event_sender
            .send(Event::CartItemAdded {
                cart_id,
                variant_id,
            })
            .await;

        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = CartEntity::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let subtotal = subtotal_minor(&items);

        Ok(CartView {
            id: cart.id,
            customer_id: cart.customer_id,
            status: cart.status,
            currency: cart.currency,
            items: items
                .into_iter()
                .map(|item| CartItemView {
                    id: item.id,
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                    unit_price_minor: item.unit_price_minor,
                    line_total_minor: item.unit_price_minor * i64::from(item.quantity),
                })
                .collect(),
            subtotal_minor: subtotal,
        })
    }

    pub(crate) async fn require_active_cart(
        &self,
        cart_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        let cart = CartEntity::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if cart.status != CartStatus::Active.as_str() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart {} is not active",
                cart_id
            )));
        }

        Ok(cart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(quantity: i32, unit_price_minor: i64) -> cart_item::Model {
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            quantity,
            unit_price_minor,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let items = vec![item(2, 1_200_00), item(1, 350_00)];
        assert_eq!(subtotal_minor(&items), 2 * 1_200_00 + 350_00);
    }

    #[test]
    fn subtotal_of_empty_cart_is_zero() {
        assert_eq!(subtotal_minor(&[]), 0);
    }
}
