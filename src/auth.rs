//! Service-role authorization for privileged worker endpoints.
//!
//! Customer traffic never reaches the queue RPCs; workers and cron callers
//! present the shared service-role key as a bearer token. Anonymous or
//! customer credentials are rejected outright, never answered with an empty
//! result.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::errors::ServiceError;
use crate::AppState;

/// Extractor proving the caller holds the service-role key.
pub struct ServiceRole;

#[async_trait]
impl FromRequestParts<AppState> for ServiceRole {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("service-role credentials required".to_string())
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ServiceError::Unauthorized("service-role credentials required".to_string())
        })?;

        if !constant_time_eq(token, &state.config.service_role_key) {
            return Err(ServiceError::Forbidden(
                "credentials lack the service role".to_string(),
            ));
        }

        Ok(ServiceRole)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
