use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::entities::booking_reservation;
use crate::errors::ServiceError;
use crate::services::reservations::HoldSlotInput;
use crate::{ApiResponse, AppState};

// POST /api/v1/reservations
#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    responses(
        (status = 200, description = "Slot held"),
        (status = 409, description = "Slot held by another customer or already booked", body = crate::errors::ErrorResponse)
    ),
    tag = "Reservations"
)]
pub async fn hold_slot(
    State(state): State<AppState>,
    Json(input): Json<HoldSlotInput>,
) -> Result<Json<ApiResponse<booking_reservation::Model>>, ServiceError> {
    let reservation = state.services.reservations.hold_slot(input).await?;
    Ok(Json(ApiResponse::success(reservation)))
}

// POST /api/v1/reservations/:id/renew
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/renew",
    responses(
        (status = 200, description = "Hold extended"),
        (status = 422, description = "Reservation expired", body = crate::errors::ErrorResponse)
    ),
    tag = "Reservations"
)]
pub async fn renew_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ApiResponse<booking_reservation::Model>>, ServiceError> {
    let reservation = state.services.reservations.renew(reservation_id).await?;
    Ok(Json(ApiResponse::success(reservation)))
}

// POST /api/v1/reservations/:id/release
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/release",
    responses(
        (status = 200, description = "Reservation released"),
        (status = 422, description = "Reservation already terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "Reservations"
)]
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ApiResponse<booking_reservation::Model>>, ServiceError> {
    let reservation = state.services.reservations.release(reservation_id).await?;
    Ok(Json(ApiResponse::success(reservation)))
}
