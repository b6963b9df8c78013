use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::cart;
use crate::errors::ServiceError;
use crate::services::carts::CartView;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCartRequest {
    pub customer_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub variant_id: Uuid,
    pub quantity: i32,
}

// POST /api/v1/carts
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    request_body = CreateCartRequest,
    responses((status = 200, description = "Cart created")),
    tag = "Carts"
)]
pub async fn create_cart(
    State(state): State<AppState>,
    Json(request): Json<CreateCartRequest>,
) -> Result<Json<ApiResponse<cart::Model>>, ServiceError> {
    let cart = state.services.carts.create_cart(request.customer_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

// POST /api/v1/carts/:id/items
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added"),
        (status = 404, description = "Cart or variant not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<ApiResponse<crate::entities::cart_item::Model>>, ServiceError> {
    let item = state
        .services
        .carts
        .add_item(cart_id, request.variant_id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

// GET /api/v1/carts/:id
#[utoipa::path(
    get,
    path = "/api/v1/carts/{id}",
    responses(
        (status = 200, description = "Cart contents with server-side totals"),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let view = state.services.carts.get_cart(cart_id).await?;
    Ok(Json(ApiResponse::success(view)))
}
