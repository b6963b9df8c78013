//! Duplicate webhook deliveries: one ledger row, one job, one order, and
//! byte-identical responses for every replay.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

use pasal_api::entities::{job, order, product_variant, webhook_event};

#[tokio::test]
async fn replayed_webhook_returns_the_recorded_outcome() {
    let app = TestApp::new().await;

    let variant = app.seed_variant("DHAKA-1", 2_000_00, 5).await;
    let cart_id = app.create_cart().await;
    app.add_cart_item(cart_id, variant.id, 1).await;
    let (intent_id, amount) = app.create_intent(cart_id, "khalti").await;

    let webhook = app.succeeded_payload("evt_dup_1", intent_id, amount);

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let response = app.deliver_webhook(&webhook).await;
        assert_eq!(response.status(), 200);
        bodies.push(response_json(response).await);
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    assert_eq!(bodies[0]["event_id"], json!("evt_dup_1"));

    // Exactly one ledger row and one job despite three deliveries
    let events = webhook_event::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(events.len(), 1);
    let jobs = job::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn duplicate_delivery_after_fulfillment_changes_nothing() {
    let app = TestApp::new().await;

    let variant = app.seed_variant("PASHMINA-1", 5_000_00, 5).await;
    let cart_id = app.create_cart().await;
    app.add_cart_item(cart_id, variant.id, 2).await;
    let (intent_id, amount) = app.create_intent(cart_id, "khalti").await;

    let webhook = app.succeeded_payload("evt_dup_2", intent_id, amount);
    app.deliver_webhook(&webhook).await;

    let drained = app
        .request_service_role(Method::POST, "/api/v1/order-worker?max_jobs=10", None)
        .await;
    let body = response_json(drained).await;
    assert_eq!(body["results"][0]["status"], json!("fulfilled"));

    // Redelivery of the processed event: identical response, no second job
    let replay = app.deliver_webhook(&webhook).await;
    assert_eq!(replay.status(), 200);
    let replay_body = response_json(replay).await;
    assert_eq!(replay_body["event_id"], json!("evt_dup_2"));

    let jobs = job::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, "done");

    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);

    let stock = product_variant::Entity::find_by_id(variant.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.available, 3);

    // The ledger records when the event was actually processed
    let event = webhook_event::Entity::find()
        .filter(webhook_event::Column::EventId.eq("evt_dup_2"))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(event.processed_at.is_some());
}

#[tokio::test]
async fn fresh_event_id_for_a_confirmed_intent_is_an_idempotent_success() {
    let app = TestApp::new().await;

    let variant = app.seed_variant("MUFFLER-1", 800_00, 5).await;
    let cart_id = app.create_cart().await;
    app.add_cart_item(cart_id, variant.id, 1).await;
    let (intent_id, amount) = app.create_intent(cart_id, "khalti").await;

    app.deliver_webhook(&app.succeeded_payload("evt_retry_a", intent_id, amount))
        .await;
    app.request_service_role(Method::POST, "/api/v1/order-worker?max_jobs=10", None)
        .await;

    // Provider retries under a new event id; a second job is created but the
    // worker recognizes the confirmed intent and never builds a second order.
    app.deliver_webhook(&app.succeeded_payload("evt_retry_b", intent_id, amount))
        .await;
    let drained = app
        .request_service_role(Method::POST, "/api/v1/order-worker?max_jobs=10", None)
        .await;
    let body = response_json(drained).await;
    assert_eq!(body["results"][0]["status"], json!("already_fulfilled"));

    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);

    let stock = product_variant::Entity::find_by_id(variant.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.available, 4);
}

#[tokio::test]
async fn bad_signature_is_rejected_and_never_enqueued() {
    let app = TestApp::new().await;

    let variant = app.seed_variant("SHAWL-1", 1_000_00, 2).await;
    let cart_id = app.create_cart().await;
    app.add_cart_item(cart_id, variant.id, 1).await;
    let (intent_id, amount) = app.create_intent(cart_id, "khalti").await;

    let webhook = app.succeeded_payload("evt_forged", intent_id, amount);

    let forged = app
        .request(
            Method::POST,
            "/api/v1/webhooks/fulfill-order",
            Some(webhook.clone()),
            &[("x-webhook-signature", "deadbeef")],
        )
        .await;
    assert_eq!(forged.status(), 401);

    let unsigned = app
        .request(
            Method::POST,
            "/api/v1/webhooks/fulfill-order",
            Some(webhook),
            &[],
        )
        .await;
    assert_eq!(unsigned.status(), 401);

    let events = webhook_event::Entity::find().all(&*app.state.db).await.unwrap();
    assert!(events.is_empty());
    let jobs = job::Entity::find().all(&*app.state.db).await.unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn unknown_provider_is_a_validation_error() {
    let app = TestApp::new().await;

    let payload = json!({
        "provider": "paypal",
        "event_id": "evt_x",
        "event_type": "payment.succeeded",
        "payment_intent_id": uuid::Uuid::new_v4(),
        "amount": 100,
        "currency": "NPR",
    });
    let response = app.deliver_webhook(&payload).await;
    assert_eq!(response.status(), 400);
}
