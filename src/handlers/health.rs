use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

// GET /api/v1/status
pub async fn api_status() -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "pasal-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

// GET /health
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
