use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::ServiceRole;
use crate::entities::job;
use crate::errors::ServiceError;
use crate::services::order_worker::JobOutcome;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct DrainQuery {
    /// Upper bound on jobs processed in this invocation
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_max_jobs() -> usize {
    10
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DrainResponse {
    pub success: bool,
    /// Empty when the queue had no eligible work; that is a valid outcome
    pub results: Vec<JobOutcome>,
}

// POST /api/v1/order-worker?max_jobs=N (service-role only)
//
// Cron/manual drain for deployments without the in-process worker loop.
#[utoipa::path(
    post,
    path = "/api/v1/order-worker",
    params(DrainQuery),
    responses(
        (status = 200, description = "Jobs processed", body = DrainResponse),
        (status = 401, description = "Missing service-role credentials", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller lacks the service role", body = crate::errors::ErrorResponse)
    ),
    tag = "Worker"
)]
pub async fn drain_order_worker(
    _role: ServiceRole,
    State(state): State<AppState>,
    Query(query): Query<DrainQuery>,
) -> Result<Json<DrainResponse>, ServiceError> {
    let worker_id = format!("drain-{}", uuid::Uuid::new_v4().simple());
    let results = state
        .services
        .order_worker
        .drain(&worker_id, query.max_jobs.min(100))
        .await?;

    Ok(Json(DrainResponse {
        success: true,
        results,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcquireJobRequest {
    pub worker_id: String,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
}

fn default_lock_timeout() -> u64 {
    60
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AcquireJobResponse {
    /// The leased job, or null when nothing is eligible
    #[schema(value_type = Option<Object>)]
    pub job: Option<job::Model>,
}

// POST /api/v1/jobs/acquire (service-role only)
//
// Lease RPC for out-of-process workers. Customer credentials are rejected
// with an authorization error, never a silent empty result.
#[utoipa::path(
    post,
    path = "/api/v1/jobs/acquire",
    request_body = AcquireJobRequest,
    responses(
        (status = 200, description = "Lease result", body = AcquireJobResponse),
        (status = 401, description = "Missing service-role credentials", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller lacks the service role", body = crate::errors::ErrorResponse)
    ),
    tag = "Worker"
)]
pub async fn acquire_job(
    _role: ServiceRole,
    State(state): State<AppState>,
    Json(request): Json<AcquireJobRequest>,
) -> Result<Json<AcquireJobResponse>, ServiceError> {
    if request.worker_id.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "worker_id must not be empty".to_string(),
        ));
    }

    let job = state
        .services
        .job_queue
        .acquire_next_job(
            &request.worker_id,
            std::time::Duration::from_secs(request.lock_timeout_seconds),
        )
        .await?;

    Ok(Json(AcquireJobResponse { job }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeadJobsQuery {
    #[serde(default = "default_dead_limit")]
    pub limit: u64,
}

fn default_dead_limit() -> u64 {
    50
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeadJobsResponse {
    #[schema(value_type = Vec<Object>)]
    pub jobs: Vec<job::Model>,
}

// GET /api/v1/jobs/dead (service-role only)
//
// Dead jobs never silently disappear; support triage starts here.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/dead",
    params(DeadJobsQuery),
    responses(
        (status = 200, description = "Dead-lettered jobs", body = DeadJobsResponse),
        (status = 401, description = "Missing service-role credentials", body = crate::errors::ErrorResponse)
    ),
    tag = "Worker"
)]
pub async fn list_dead_jobs(
    _role: ServiceRole,
    State(state): State<AppState>,
    Query(query): Query<DeadJobsQuery>,
) -> Result<Json<DeadJobsResponse>, ServiceError> {
    let jobs = state
        .services
        .job_queue
        .dead_jobs(query.limit.min(500))
        .await?;
    Ok(Json(DeadJobsResponse { jobs }))
}
