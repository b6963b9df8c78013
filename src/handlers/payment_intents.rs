use axum::{extract::State, Json};

use crate::errors::ServiceError;
use crate::services::payment_intents::{CreateIntentInput, CreateIntentOutcome};
use crate::AppState;

// POST /api/v1/payment-intents
#[utoipa::path(
    post,
    path = "/api/v1/payment-intents",
    request_body = CreateIntentInput,
    responses(
        (status = 200, description = "Checkout handoff", body = CreateIntentOutcome),
        (status = 400, description = "Empty cart or invalid input", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock or expired reservation", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(input): Json<CreateIntentInput>,
) -> Result<Json<CreateIntentOutcome>, ServiceError> {
    let outcome = state.services.payment_intents.create_intent(input).await?;
    Ok(Json(outcome))
}
