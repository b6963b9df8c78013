//! Booking-slot reservation state machine: hold, renew, release, expiry
//! sweep, and the worker-time confirmation guard.

mod common;

use axum::http::Method;
use chrono::{Duration as ChronoDuration, Utc};
use common::{response_json, TestApp};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};
use uuid::Uuid;

use pasal_api::entities::booking_reservation::{self, Entity as ReservationEntity};
use pasal_api::entities::{booking, order};

fn slot_body(cart_id: Uuid, stylist_id: Uuid, offset_hours: i64) -> Value {
    let starts = Utc::now() + ChronoDuration::hours(offset_hours);
    json!({
        "cart_id": cart_id,
        "service_id": Uuid::new_v4(),
        "stylist_id": stylist_id,
        "starts_at": starts,
        "ends_at": starts + ChronoDuration::hours(1),
    })
}

async fn rewind_expiry(app: &TestApp, reservation_id: Uuid) {
    ReservationEntity::update_many()
        .col_expr(
            booking_reservation::Column::ExpiresAt,
            Expr::value(Utc::now() - ChronoDuration::seconds(5)),
        )
        .filter(booking_reservation::Column::Id.eq(reservation_id))
        .exec(&*app.state.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn holding_an_already_held_slot_conflicts() {
    let app = TestApp::new().await;
    let stylist = Uuid::new_v4();

    let first = app
        .request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, stylist, 24)),
            &[],
        )
        .await;
    assert_eq!(first.status(), 200);
    let body = response_json(first).await;
    assert_eq!(body["data"]["status"], json!("held"));

    let overlapping = app
        .request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, stylist, 24)),
            &[],
        )
        .await;
    assert_eq!(overlapping.status(), 409);

    // A different stylist's calendar is unaffected
    let other = app
        .request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, Uuid::new_v4(), 24)),
            &[],
        )
        .await;
    assert_eq!(other.status(), 200);
}

#[tokio::test]
async fn renew_extends_the_hold_and_release_ends_it() {
    let app = TestApp::new().await;

    let created = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, Uuid::new_v4(), 24)),
            &[],
        )
        .await,
    )
    .await;
    let id: Uuid = created["data"]["id"].as_str().unwrap().parse().unwrap();
    let held_until: chrono::DateTime<Utc> =
        created["data"]["expires_at"].as_str().unwrap().parse().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let renewed = response_json(
        app.request(
            Method::POST,
            &format!("/api/v1/reservations/{}/renew", id),
            None,
            &[],
        )
        .await,
    )
    .await;
    let renewed_until: chrono::DateTime<Utc> =
        renewed["data"]["expires_at"].as_str().unwrap().parse().unwrap();
    assert!(renewed_until > held_until);

    let released = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{}/release", id),
            None,
            &[],
        )
        .await;
    assert_eq!(released.status(), 200);

    // Terminal states cannot be renewed
    let late_renew = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{}/renew", id),
            None,
            &[],
        )
        .await;
    assert_eq!(late_renew.status(), 422);
}

#[tokio::test]
async fn overdue_hold_cannot_be_renewed_and_flips_to_expired() {
    let app = TestApp::new().await;

    let created = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, Uuid::new_v4(), 24)),
            &[],
        )
        .await,
    )
    .await;
    let id: Uuid = created["data"]["id"].as_str().unwrap().parse().unwrap();
    rewind_expiry(&app, id).await;

    let renew = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{}/renew", id),
            None,
            &[],
        )
        .await;
    assert_eq!(renew.status(), 422);

    let row = ReservationEntity::find_by_id(id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "expired");
}

#[tokio::test]
async fn sweeper_expires_only_overdue_holds() {
    let app = TestApp::new().await;

    let fresh = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, Uuid::new_v4(), 24)),
            &[],
        )
        .await,
    )
    .await;
    let fresh_id: Uuid = fresh["data"]["id"].as_str().unwrap().parse().unwrap();

    let overdue = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(app.create_cart().await, Uuid::new_v4(), 48)),
            &[],
        )
        .await,
    )
    .await;
    let overdue_id: Uuid = overdue["data"]["id"].as_str().unwrap().parse().unwrap();
    rewind_expiry(&app, overdue_id).await;

    let result = app
        .state
        .services
        .reservations
        .cleanup_expired_reservations()
        .await
        .unwrap();
    assert_eq!(result.expired_count, 1);

    let fresh_row = ReservationEntity::find_by_id(fresh_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh_row.status, "held");
    let overdue_row = ReservationEntity::find_by_id(overdue_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(overdue_row.status, "expired");
}

#[tokio::test]
async fn expired_hold_fails_checkout_validation() {
    let app = TestApp::new().await;

    let cart_id = app.create_cart().await;
    let created = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(cart_id, Uuid::new_v4(), 24)),
            &[],
        )
        .await,
    )
    .await;
    let id: Uuid = created["data"]["id"].as_str().unwrap().parse().unwrap();
    rewind_expiry(&app, id).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment-intents",
            Some(json!({
                "cart_id": cart_id,
                "shipping_address": { "line1": "x", "city": "y", "country": "NP" },
                "payment_method": "khalti",
            })),
            &[],
        )
        .await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn hold_that_expires_mid_pipeline_dead_letters_and_never_confirms() {
    let app = TestApp::new().await;

    // Cart with a product and a valid hold passes checkout
    let variant = app.seed_variant("CUT-AND-COLOR-KIT", 1_500_00, 5).await;
    let cart_id = app.create_cart().await;
    app.add_cart_item(cart_id, variant.id, 1).await;
    let created = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(cart_id, Uuid::new_v4(), 24)),
            &[],
        )
        .await,
    )
    .await;
    let reservation_id: Uuid = created["data"]["id"].as_str().unwrap().parse().unwrap();

    let (intent_id, amount) = app.create_intent(cart_id, "khalti").await;

    // The customer dawdles on the provider page past the hold deadline
    rewind_expiry(&app, reservation_id).await;

    app.deliver_webhook(&app.succeeded_payload("evt_late_hold", intent_id, amount))
        .await;
    let drained = app
        .request_service_role(Method::POST, "/api/v1/order-worker?max_jobs=10", None)
        .await;
    let body = response_json(drained).await;
    assert_eq!(body["results"][0]["status"], json!("dead"));
    assert!(body["results"][0]["error"]
        .as_str()
        .unwrap()
        .contains("Reservation expired"));

    // The reservation observes expired, never confirmed
    let row = ReservationEntity::find_by_id(reservation_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "expired");

    // And the aborted transaction left nothing behind
    assert!(order::Entity::find().all(&*app.state.db).await.unwrap().is_empty());
    assert!(booking::Entity::find().all(&*app.state.db).await.unwrap().is_empty());
    let stock = pasal_api::entities::product_variant::Entity::find_by_id(variant.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.available, 5);
}

#[tokio::test]
async fn confirmed_hold_becomes_a_permanent_booking() {
    let app = TestApp::new().await;

    let variant = app.seed_variant("SPA-VOUCHER", 2_500_00, 3).await;
    let cart_id = app.create_cart().await;
    app.add_cart_item(cart_id, variant.id, 1).await;
    let created = response_json(
        app.request(
            Method::POST,
            "/api/v1/reservations",
            Some(slot_body(cart_id, Uuid::new_v4(), 24)),
            &[],
        )
        .await,
    )
    .await;
    let reservation_id: Uuid = created["data"]["id"].as_str().unwrap().parse().unwrap();

    let (intent_id, amount) = app.create_intent(cart_id, "khalti").await;
    app.deliver_webhook(&app.succeeded_payload("evt_booked", intent_id, amount))
        .await;
    let drained = app
        .request_service_role(Method::POST, "/api/v1/order-worker?max_jobs=10", None)
        .await;
    let body = response_json(drained).await;
    assert_eq!(body["results"][0]["status"], json!("fulfilled"));

    let row = ReservationEntity::find_by_id(reservation_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "confirmed");

    let bookings = booking::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].starts_at, row.starts_at);

    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert_eq!(bookings[0].order_id, orders[0].id);
}
