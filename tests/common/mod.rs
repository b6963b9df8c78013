#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    middleware,
    response::Response,
    Router,
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use pasal_api::{
    config::AppConfig,
    db,
    entities::product_variant,
    events::{self, EventSender},
    handlers::AppServices,
    payments::{MockPaymentGateway, PaymentGateway},
    request_id,
    services::webhooks::sign_payload,
    AppState,
};

/// Harness spinning up the full app state on a throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    /// Kept concrete so tests can install canned verification results.
    pub gateway: Arc<MockPaymentGateway>,
    _tmp: tempfile::TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = tempfile::TempDir::new().expect("temp dir for test database");
        let db_path = tmp.path().join("pasal_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockPaymentGateway::new());
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            gateway.clone() as Arc<dyn PaymentGateway>,
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", pasal_api::api_v1_routes())
            .layer(middleware::from_fn(request_id::request_id_middleware))
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _tmp: tmp,
            _event_task: event_task,
        }
    }

    /// Bearer key authorizing the privileged worker surface.
    pub fn service_key(&self) -> String {
        self.state.config.service_role_key.clone()
    }

    /// Send a request against the router with optional JSON body and headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Request carrying the service-role bearer key.
    pub async fn request_service_role(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let key = self.service_key();
        let auth = format!("Bearer {}", key);
        self.request(method, uri, body, &[("authorization", &auth)])
            .await
    }

    /// Deliver a provider webhook with a valid HMAC signature over the body.
    pub async fn deliver_webhook(&self, payload: &Value) -> Response {
        let raw = serde_json::to_vec(payload).expect("serialize webhook payload");
        let signature = sign_payload(&self.state.config.payment_webhook_secret, &raw);
        self.request(
            Method::POST,
            "/api/v1/webhooks/fulfill-order",
            Some(payload.clone()),
            &[("x-webhook-signature", &signature)],
        )
        .await
    }

    /// Seed a sellable product variant directly in the store.
    pub async fn seed_variant(
        &self,
        sku: &str,
        price_minor: i64,
        available: i32,
    ) -> product_variant::Model {
        product_variant::ActiveModel {
            sku: Set(sku.to_string()),
            name: Set(format!("Test Variant {}", sku)),
            price_minor: Set(price_minor),
            available: Set(available),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product variant for tests")
    }

    /// Create a cart for a fresh customer and return its id.
    pub async fn create_cart(&self) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/api/v1/carts",
                Some(json!({ "customer_id": Uuid::new_v4() })),
                &[],
            )
            .await;
        assert_eq!(response.status(), 200, "cart creation failed");
        let body = response_json(response).await;
        body["data"]["id"]
            .as_str()
            .expect("cart id in response")
            .parse()
            .expect("cart id is a uuid")
    }

    /// Add a line item to a cart through the API.
    pub async fn add_cart_item(&self, cart_id: Uuid, variant_id: Uuid, quantity: i32) {
        let response = self
            .request(
                Method::POST,
                &format!("/api/v1/carts/{}/items", cart_id),
                Some(json!({ "variant_id": variant_id, "quantity": quantity })),
                &[],
            )
            .await;
        assert_eq!(response.status(), 200, "add cart item failed");
    }

    /// Run checkout for a cart and return the created intent's id and amount.
    pub async fn create_intent(&self, cart_id: Uuid, payment_method: &str) -> (Uuid, i64) {
        let response = self
            .request(
                Method::POST,
                "/api/v1/payment-intents",
                Some(json!({
                    "cart_id": cart_id,
                    "shipping_address": {
                        "line1": "Thamel Marg",
                        "city": "Kathmandu",
                        "country": "NP"
                    },
                    "payment_method": payment_method,
                })),
                &[],
            )
            .await;
        assert_eq!(response.status(), 200, "payment intent creation failed");
        let body = response_json(response).await;
        let intent_id: Uuid = body["intent_id"]
            .as_str()
            .expect("intent id in response")
            .parse()
            .expect("intent id is a uuid");

        let intent = pasal_api::entities::payment_intent::Entity::find_by_id(intent_id)
            .one(&*self.state.db)
            .await
            .expect("query intent")
            .expect("intent persisted");
        (intent_id, intent.amount_minor)
    }

    /// Webhook body a provider would send for a settled payment.
    pub fn succeeded_payload(&self, event_id: &str, intent_id: Uuid, amount: i64) -> Value {
        json!({
            "provider": "khalti",
            "event_id": event_id,
            "event_type": "payment.succeeded",
            "payment_intent_id": intent_id,
            "amount": amount,
            "currency": "NPR",
            "customer_id": null,
            "metadata": null
        })
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Decode a response body as JSON.
pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
