//! Lease semantics of the durable job queue: single claim, stale-lease
//! recovery, retry backoff, and dead-lettering.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::TestApp;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

use pasal_api::entities::job::{self, Entity as JobEntity};
use pasal_api::errors::ServiceError;

const LEASE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn one_job_yields_exactly_one_lease() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    queue
        .enqueue("fulfill_order", json!({"payment_intent_id": "x"}))
        .await
        .unwrap();

    let first = queue.acquire_next_job("worker-a", LEASE).await.unwrap();
    let second = queue.acquire_next_job("worker-b", LEASE).await.unwrap();

    let job = first.expect("first caller gets the job");
    assert!(second.is_none(), "second caller must come up empty");
    assert_eq!(job.status, "leased");
    assert_eq!(job.lease_owner.as_deref(), Some("worker-a"));
    assert_eq!(job.attempt_count, 1);
    assert!(job.lease_expires_at.is_some());
}

#[tokio::test]
async fn concurrent_acquires_never_double_claim() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    queue
        .enqueue("fulfill_order", json!({"n": 1}))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        queue.acquire_next_job("worker-a", LEASE),
        queue.acquire_next_job("worker-b", LEASE),
    );
    let claims = [a.unwrap(), b.unwrap()];
    let won = claims.iter().filter(|claim| claim.is_some()).count();
    assert_eq!(won, 1, "exactly one concurrent caller may win the lease");
}

#[tokio::test]
async fn jobs_are_claimed_oldest_first() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    let mut enqueued = Vec::new();
    for n in 0..3 {
        enqueued.push(queue.enqueue("fulfill_order", json!({"n": n})).await.unwrap().id);
        // Distinct created_at timestamps keep the FIFO order observable
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for expected in &enqueued {
        let claimed = queue
            .acquire_next_job("worker-a", LEASE)
            .await
            .unwrap()
            .expect("queued job available");
        assert_eq!(claimed.id, *expected);
    }
}

#[tokio::test]
async fn expired_lease_is_reclaimable_and_the_old_owner_is_rejected() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    let created = queue
        .enqueue("fulfill_order", json!({"n": 1}))
        .await
        .unwrap();
    let claimed = queue
        .acquire_next_job("worker-a", LEASE)
        .await
        .unwrap()
        .unwrap();

    // Worker A goes silent; rewind its lease past the deadline
    JobEntity::update_many()
        .col_expr(
            job::Column::LeaseExpiresAt,
            Expr::value(Some(Utc::now() - ChronoDuration::seconds(5))),
        )
        .filter(job::Column::Id.eq(claimed.id))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let reclaimed = queue
        .acquire_next_job("worker-b", LEASE)
        .await
        .unwrap()
        .expect("stale lease must be re-acquirable");
    assert_eq!(reclaimed.id, created.id);
    assert_eq!(reclaimed.lease_owner.as_deref(), Some("worker-b"));
    assert_eq!(reclaimed.attempt_count, 2);

    // A's late completion must not silently mark the job done
    let stale = queue.complete_job(created.id, "worker-a").await;
    assert!(matches!(stale, Err(ServiceError::LeaseLost(_))));

    queue.complete_job(created.id, "worker-b").await.unwrap();
    let done = queue.get_job(created.id).await.unwrap().unwrap();
    assert_eq!(done.status, "done");

    // A completed job is not acquirable
    assert!(queue
        .acquire_next_job("worker-c", LEASE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn retryable_failure_requeues_behind_a_backoff_gate() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    let created = queue
        .enqueue("fulfill_order", json!({"n": 1}))
        .await
        .unwrap();
    queue
        .acquire_next_job("worker-a", LEASE)
        .await
        .unwrap()
        .unwrap();

    let status = queue
        .fail_job(created.id, "worker-a", "provider timeout", true)
        .await
        .unwrap();
    assert_eq!(status.as_str(), "queued");

    let requeued = queue.get_job(created.id).await.unwrap().unwrap();
    assert_eq!(requeued.last_error.as_deref(), Some("provider timeout"));
    let not_before = requeued.not_before.expect("backoff gate recorded");
    assert!(not_before > Utc::now());

    // Gated: not acquirable until not_before elapses
    assert!(queue
        .acquire_next_job("worker-b", LEASE)
        .await
        .unwrap()
        .is_none());

    JobEntity::update_many()
        .col_expr(
            job::Column::NotBefore,
            Expr::value(Some(Utc::now() - ChronoDuration::seconds(1))),
        )
        .filter(job::Column::Id.eq(created.id))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let reclaimed = queue
        .acquire_next_job("worker-b", LEASE)
        .await
        .unwrap()
        .expect("job acquirable once the gate elapses");
    assert_eq!(reclaimed.attempt_count, 2);
}

#[tokio::test]
async fn exhausted_attempts_dead_letter_the_job() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    let created = queue
        .enqueue("fulfill_order", json!({"n": 1}))
        .await
        .unwrap();
    queue
        .acquire_next_job("worker-a", LEASE)
        .await
        .unwrap()
        .unwrap();

    // Pretend earlier attempts already burned the budget
    JobEntity::update_many()
        .col_expr(
            job::Column::AttemptCount,
            Expr::value(created.max_attempts),
        )
        .filter(job::Column::Id.eq(created.id))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let status = queue
        .fail_job(created.id, "worker-a", "still timing out", true)
        .await
        .unwrap();
    assert_eq!(status.as_str(), "dead");

    let dead = queue.dead_jobs(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, created.id);
    assert_eq!(dead[0].last_error.as_deref(), Some("still timing out"));

    // Dead jobs are never acquirable again
    assert!(queue
        .acquire_next_job("worker-b", LEASE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn terminal_failure_skips_the_retry_budget() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    let created = queue
        .enqueue("fulfill_order", json!({"n": 1}))
        .await
        .unwrap();
    queue
        .acquire_next_job("worker-a", LEASE)
        .await
        .unwrap()
        .unwrap();

    let status = queue
        .fail_job(created.id, "worker-a", "Insufficient stock: SKU-1", false)
        .await
        .unwrap();
    assert_eq!(status.as_str(), "dead");
    assert_eq!(
        queue.get_job(created.id).await.unwrap().unwrap().attempt_count,
        1
    );
}

#[tokio::test]
async fn failing_a_job_requires_the_lease() {
    let app = TestApp::new().await;
    let queue = app.state.services.job_queue.clone();

    let created = queue
        .enqueue("fulfill_order", json!({"n": 1}))
        .await
        .unwrap();
    queue
        .acquire_next_job("worker-a", LEASE)
        .await
        .unwrap()
        .unwrap();

    let stale = queue
        .fail_job(created.id, "worker-b", "not my job", true)
        .await;
    assert!(matches!(stale, Err(ServiceError::LeaseLost(_))));
}
