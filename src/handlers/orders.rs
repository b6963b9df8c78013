use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::payment_intents::OrderStatusView;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct CheckStatusQuery {
    pub payment_intent_id: Uuid,
}

// GET /api/v1/orders/check-status?payment_intent_id=…
//
// Polled by the storefront after the provider redirect while the worker
// materializes the order.
#[utoipa::path(
    get,
    path = "/api/v1/orders/check-status",
    params(CheckStatusQuery),
    responses(
        (status = 200, description = "Order lookup result", body = OrderStatusView)
    ),
    tag = "Orders"
)]
pub async fn check_order_status(
    State(state): State<AppState>,
    Query(query): Query<CheckStatusQuery>,
) -> Result<Json<OrderStatusView>, ServiceError> {
    let view = state
        .services
        .payment_intents
        .order_status(query.payment_intent_id)
        .await?;
    Ok(Json(view))
}
