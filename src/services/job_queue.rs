//! Durable, lease-based job queue.
//!
//! Jobs are claimed with a time-boxed exclusive lease. A lease that is not
//! renewed before `lease_expires_at` is presumed abandoned and the job
//! becomes re-acquirable; that expiry is the system's only cancellation
//! mechanism. Claiming is a single atomic read-modify-write so two workers
//! can never acquire the same job.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entities::job::{self, Entity as JobEntity, JobStatus};
use crate::errors::ServiceError;

/// Exponential backoff base for retry scheduling (seconds)
const BASE_BACKOFF_SECS: u64 = 2;
/// Backoff ceiling (seconds)
const MAX_BACKOFF_SECS: u64 = 3600;
/// How many lost claim races to tolerate before giving up this poll
const MAX_CLAIM_ATTEMPTS: usize = 8;

/// Delay before a failed attempt becomes eligible again.
pub fn backoff_delay(attempt: i32) -> Duration {
    let secs = BASE_BACKOFF_SECS
        .saturating_pow(attempt.max(1) as u32)
        .min(MAX_BACKOFF_SECS);
    Duration::seconds(secs as i64)
}

/// Enqueues a job on the caller's connection. Pass a transaction to make the
/// enqueue atomic with the write that caused it (e.g. the webhook ledger
/// insert).
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    job_type: &str,
    payload: Value,
    max_attempts: i32,
) -> Result<job::Model, ServiceError> {
    let model = job::ActiveModel {
        job_type: Set(job_type.to_string()),
        payload: Set(payload),
        status: Set(JobStatus::Queued.as_str().to_string()),
        attempt_count: Set(0),
        max_attempts: Set(max_attempts),
        ..Default::default()
    };
    let created = model.insert(conn).await?;
    counter!("pasal_jobs.enqueued", 1);
    debug!(job_id = %created.id, job_type, "enqueued job");
    Ok(created)
}

/// Service owning job lifecycle transitions.
#[derive(Clone)]
pub struct JobQueueService {
    db: Arc<DatabaseConnection>,
    max_attempts: i32,
}

impl JobQueueService {
    pub fn new(db: Arc<DatabaseConnection>, max_attempts: i32) -> Self {
        Self { db, max_attempts }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    #[instrument(skip(self))]
    pub async fn enqueue(&self, job_type: &str, payload: Value) -> Result<job::Model, ServiceError> {
        enqueue(&*self.db, job_type, payload, self.max_attempts).await
    }

    /// Atomically claims the oldest eligible job: `queued` with its backoff
    /// gate elapsed, or `leased` with an expired lease (prior worker presumed
    /// dead). FIFO by creation time, ties broken by id.
    #[instrument(skip(self, lease_timeout))]
    pub async fn acquire_next_job(
        &self,
        worker_id: &str,
        lease_timeout: StdDuration,
    ) -> Result<Option<job::Model>, ServiceError> {
        if self.db.get_database_backend() == DbBackend::Postgres {
            return self.acquire_postgres(worker_id, lease_timeout).await;
        }
        self.acquire_compare_and_swap(worker_id, lease_timeout).await
    }

    /// Postgres path: one statement, `FOR UPDATE SKIP LOCKED`, so concurrent
    /// workers skip past each other instead of blocking or double-claiming.
    async fn acquire_postgres(
        &self,
        worker_id: &str,
        lease_timeout: StdDuration,
    ) -> Result<Option<job::Model>, ServiceError> {
        let sql = r#"
            WITH cte AS (
                SELECT id FROM jobs
                WHERE (status = 'queued' AND (not_before IS NULL OR not_before <= NOW()))
                   OR (status = 'leased' AND lease_expires_at < NOW())
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE jobs j
            SET status = 'leased',
                lease_owner = $1,
                lease_expires_at = NOW() + make_interval(secs := $2::int),
                attempt_count = j.attempt_count + 1,
                updated_at = NOW()
            FROM cte
            WHERE j.id = cte.id
            RETURNING j.id
        "#;
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            vec![
                worker_id.into(),
                (lease_timeout.as_secs() as i64).into(),
            ],
        );

        let row = self.db.query_one(stmt).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row
            .try_get("", "id")
            .map_err(|e| ServiceError::QueueError(format!("claim returned no id: {}", e)))?;

        let claimed = JobEntity::find_by_id(id).one(&*self.db).await?.ok_or_else(|| {
            ServiceError::QueueError(format!("claimed job {} disappeared", id))
        })?;

        counter!("pasal_jobs.acquired", 1);
        Ok(Some(claimed))
    }

    /// Fallback for backends without SKIP LOCKED (SQLite): pick the oldest
    /// candidate, then claim it with a conditional update that re-checks
    /// eligibility. A lost race affects zero rows and we move on.
    async fn acquire_compare_and_swap(
        &self,
        worker_id: &str,
        lease_timeout: StdDuration,
    ) -> Result<Option<job::Model>, ServiceError> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let now = Utc::now();
            let candidate = JobEntity::find()
                .filter(Self::eligible(now))
                .order_by_asc(job::Column::CreatedAt)
                .order_by_asc(job::Column::Id)
                .limit(1)
                .one(&*self.db)
                .await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let expires = now
                + Duration::from_std(lease_timeout)
                    .map_err(|e| ServiceError::QueueError(format!("lease timeout: {}", e)))?;

            let claimed = JobEntity::update_many()
                .col_expr(
                    job::Column::Status,
                    Expr::value(JobStatus::Leased.as_str()),
                )
                .col_expr(job::Column::LeaseOwner, Expr::value(Some(worker_id.to_string())))
                .col_expr(job::Column::LeaseExpiresAt, Expr::value(Some(expires)))
                .col_expr(
                    job::Column::AttemptCount,
                    Expr::col(job::Column::AttemptCount).add(1),
                )
                .col_expr(job::Column::UpdatedAt, Expr::value(Some(now)))
                .filter(job::Column::Id.eq(candidate.id))
                .filter(Self::eligible(now))
                .exec(&*self.db)
                .await?;

            if claimed.rows_affected == 1 {
                let model = JobEntity::find_by_id(candidate.id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::QueueError(format!("claimed job {} disappeared", candidate.id))
                    })?;
                counter!("pasal_jobs.acquired", 1);
                return Ok(Some(model));
            }
            // another worker won this row; try the next candidate
        }
        Ok(None)
    }

    fn eligible(now: DateTime<Utc>) -> Condition {
        Condition::any()
            .add(
                Condition::all()
                    .add(job::Column::Status.eq(JobStatus::Queued.as_str()))
                    .add(
                        Condition::any()
                            .add(job::Column::NotBefore.is_null())
                            .add(job::Column::NotBefore.lte(now)),
                    ),
            )
            .add(
                Condition::all()
                    .add(job::Column::Status.eq(JobStatus::Leased.as_str()))
                    .add(job::Column::LeaseExpiresAt.lt(now)),
            )
    }

    /// Marks a job done, but only while the caller still owns the lease. A
    /// stale owner (whose lease was reclaimed) gets `LeaseLost`, never a
    /// silent double-done.
    #[instrument(skip(self))]
    pub async fn complete_job(&self, job_id: Uuid, worker_id: &str) -> Result<(), ServiceError> {
        let updated = JobEntity::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Done.as_str()))
            .col_expr(job::Column::LeaseOwner, Expr::value(None::<String>))
            .col_expr(
                job::Column::LeaseExpiresAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(job::Column::Id.eq(job_id))
            .filter(job::Column::Status.eq(JobStatus::Leased.as_str()))
            .filter(job::Column::LeaseOwner.eq(worker_id))
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            warn!(job_id = %job_id, worker_id, "complete_job rejected; lease not held");
            return Err(ServiceError::LeaseLost(job_id));
        }
        counter!("pasal_jobs.completed", 1);
        Ok(())
    }

    /// Records a failure. Retryable failures go back to `queued` behind an
    /// exponential `not_before` gate until attempts run out; everything else
    /// is dead-lettered with the structured reason preserved.
    #[instrument(skip(self, error))]
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<JobStatus, ServiceError> {
        let current = JobEntity::find_by_id(job_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Job {} not found", job_id)))?;

        if current.status != JobStatus::Leased.as_str()
            || current.lease_owner.as_deref() != Some(worker_id)
        {
            warn!(job_id = %job_id, worker_id, "fail_job rejected; lease not held");
            return Err(ServiceError::LeaseLost(job_id));
        }

        let now = Utc::now();
        if retryable && current.attempt_count < current.max_attempts {
            let not_before = now + backoff_delay(current.attempt_count);
            let mut active: job::ActiveModel = current.into();
            active.status = Set(JobStatus::Queued.as_str().to_string());
            active.lease_owner = Set(None);
            active.lease_expires_at = Set(None);
            active.not_before = Set(Some(not_before));
            active.last_error = Set(Some(error.to_string()));
            active.update(&*self.db).await?;

            counter!("pasal_jobs.retried", 1);
            info!(job_id = %job_id, not_before = %not_before, "job requeued with backoff");
            Ok(JobStatus::Queued)
        } else {
            let mut active: job::ActiveModel = current.into();
            active.status = Set(JobStatus::Dead.as_str().to_string());
            active.lease_owner = Set(None);
            active.lease_expires_at = Set(None);
            active.last_error = Set(Some(error.to_string()));
            active.update(&*self.db).await?;

            counter!("pasal_jobs.dead", 1);
            warn!(job_id = %job_id, error, "job dead-lettered");
            Ok(JobStatus::Dead)
        }
    }

    /// Dead jobs never silently disappear; the admin surface reads them here.
    #[instrument(skip(self))]
    pub async fn dead_jobs(&self, limit: u64) -> Result<Vec<job::Model>, ServiceError> {
        Ok(JobEntity::find()
            .filter(job::Column::Status.eq(JobStatus::Dead.as_str()))
            .order_by_desc(job::Column::UpdatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<job::Model>, ServiceError> {
        Ok(JobEntity::find_by_id(job_id).one(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_delay(1).num_seconds(), 2);
        assert_eq!(backoff_delay(2).num_seconds(), 4);
        assert_eq!(backoff_delay(3).num_seconds(), 8);
        assert_eq!(backoff_delay(0).num_seconds(), 2);
        assert_eq!(backoff_delay(30).num_seconds(), MAX_BACKOFF_SECS as i64);
    }
}
