use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;

use crate::errors::ServiceError;
use crate::services::webhooks::WebhookResponse;
use crate::AppState;

/// Real providers sign the raw body with this header
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Test-mode shortcut honored only when webhook_test_mode is on
pub const MOCK_SIGNATURE_HEADER: &str = "x-mock-signature";

// POST /api/v1/webhooks/fulfill-order
//
// Must answer fast: the provider only needs to know the event was durably
// accepted, never how fulfillment went. Detailed failures live on the job.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/fulfill-order",
    request_body = crate::services::webhooks::WebhookPayload,
    responses(
        (status = 200, description = "Event accepted or idempotently replayed", body = WebhookResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn fulfill_order_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let mock_signature = headers
        .get(MOCK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let response = state
        .services
        .webhooks
        .ingest(signature, mock_signature, &body)
        .await?;

    Ok(Json(response))
}
