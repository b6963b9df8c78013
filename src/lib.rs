//! Pasal API Library
//!
//! Core of the asynchronous order fulfillment pipeline: payment intents,
//! webhook ingestion with an idempotency ledger, a lease-based job queue,
//! the order worker, and booking-slot reservations.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod request_id;
pub mod services;

use axum::{routing::get, routing::post, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::request_id::current_request_id()
                .map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<axum::Json<ApiResponse<T>>, errors::ServiceError>;

// Full v1 API surface
pub fn api_v1_routes() -> Router<AppState> {
    // Storefront-facing checkout pipeline
    let checkout = Router::new()
        .route(
            "/payment-intents",
            post(handlers::payment_intents::create_payment_intent),
        )
        .route(
            "/orders/check-status",
            get(handlers::orders::check_order_status),
        );

    // Provider-facing ingestion (signature-verified, no session auth)
    let webhooks = Router::new().route(
        "/webhooks/fulfill-order",
        post(handlers::webhooks::fulfill_order_webhook),
    );

    // Privileged worker surface (service-role key)
    let worker = Router::new()
        .route("/order-worker", post(handlers::worker::drain_order_worker))
        .route("/jobs/acquire", post(handlers::worker::acquire_job))
        .route("/jobs/dead", get(handlers::worker::list_dead_jobs));

    // Cart and reservation store consumed by the UI layer
    let carts = Router::new()
        .route("/carts", post(handlers::carts::create_cart))
        .route("/carts/:id", get(handlers::carts::get_cart))
        .route("/carts/:id/items", post(handlers::carts::add_cart_item));

    let reservations = Router::new()
        .route("/reservations", post(handlers::reservations::hold_slot))
        .route(
            "/reservations/:id/renew",
            post(handlers::reservations::renew_reservation),
        )
        .route(
            "/reservations/:id/release",
            post(handlers::reservations::release_reservation),
        );

    Router::new()
        .route("/status", get(handlers::health::api_status))
        .route("/health", get(handlers::health::health_check))
        .merge(checkout)
        .merge(webhooks)
        .merge(worker)
        .merge(carts)
        .merge(reservations)
}

// Request logging middleware
pub async fn request_logging_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}
