use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::request_id::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard error envelope returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional detail (offending variants, field names)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Reservation expired: {0}")]
    ReservationExpired(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Lease no longer held for job {0}")]
    LeaseLost(Uuid),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// Single source of truth for the error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::QueueError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::EmptyCart | Self::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock(_) | Self::ReservationExpired(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidSignature | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::LeaseLost(_) => StatusCode::CONFLICT,
            Self::PaymentVerificationFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message suitable for HTTP responses. Internal failures collapse to a
    /// generic message so implementation detail never leaks to callers.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::QueueError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether a retry could plausibly succeed. Drives the requeue-vs-dead
    /// decision when the order worker fails a job.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::QueueError(_)
                | Self::ExternalServiceError(_)
                | Self::Conflict(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::EmptyCart.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock("v1".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ReservationExpired("r1".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::LeaseLost(Uuid::new_v4()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentVerificationFailed("x".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::ExternalServiceError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("connection string leaked".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::QueueError("jobs table gone".into()).response_message(),
            "Internal server error"
        );
        // User-facing errors keep the actual message
        assert_eq!(
            ServiceError::InsufficientStock("SKU-1".into()).response_message(),
            "Insufficient stock: SKU-1"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(ServiceError::ExternalServiceError("timeout".into()).is_transient());
        assert!(ServiceError::DatabaseError(DbErr::Custom("lock".into())).is_transient());
        assert!(!ServiceError::InsufficientStock("v".into()).is_transient());
        assert!(!ServiceError::ReservationExpired("r".into()).is_transient());
    }

    #[tokio::test]
    async fn error_response_includes_request_id() {
        let response = crate::request_id::scope_request_id(
            crate::request_id::RequestId::new("req-123"),
            async { ServiceError::NotFound("missing".into()).into_response() },
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }
}
