//! API routes for Courier endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use courier_queue::{Job, JobId, StatsSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::jobs::email::EmailPayload;
use crate::state::AppState;

/// Longest delay a producer may ask for
pub const MAX_DELAY_SECS: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub components: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub database: ComponentStatus,
    pub worker: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Health check with store connectivity and worker state
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let start = std::time::Instant::now();
    let db_healthy = state.queue().store().is_healthy().await;
    let db_latency = start.elapsed().as_millis() as u64;

    let worker = ComponentStatus {
        status: state
            .worker_state()
            .map(|s| s.as_str())
            .unwrap_or("absent")
            .to_string(),
        latency_ms: None,
    };

    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        components: ComponentHealth {
            database: ComponentStatus {
                status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
                latency_ms: Some(db_latency),
            },
            worker,
        },
    })
}

/// Email enqueue request
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub email: String,
    pub subject: String,
    pub body: String,
    /// Seconds before the job becomes eligible; absent or null means now
    #[serde(default)]
    pub delay: Option<f64>,
}

impl EnqueueRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') || email.chars().any(char::is_whitespace) {
            return Err(ApiError::Validation(format!("invalid email address '{}'", self.email)));
        }
        if self.subject.trim().is_empty() {
            return Err(ApiError::Validation("subject must not be empty".to_string()));
        }
        let delay = self.delay.unwrap_or(0.0);
        if !delay.is_finite() || delay < 0.0 {
            return Err(ApiError::Validation(
                "delay must be a non-negative number of seconds".to_string(),
            ));
        }
        if delay > MAX_DELAY_SECS {
            return Err(ApiError::Validation(format!(
                "delay exceeds limit of {} seconds",
                MAX_DELAY_SECS
            )));
        }
        Ok(())
    }

    /// Only meaningful after `validate`
    fn delay(&self) -> Duration {
        Duration::milliseconds((self.delay.unwrap_or(0.0) * 1000.0).round() as i64)
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub status: String,
    #[serde(rename = "jobId")]
    pub job_id: JobId,
}

/// Enqueue an email job
pub async fn enqueue_job(
    State(state): State<AppState>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<Json<EnqueueResponse>> {
    let Json(req) = body?;
    req.validate()?;
    let delay = req.delay();

    let payload = EmailPayload {
        email: req.email.trim().to_string(),
        subject: req.subject,
        body: req.body,
    };
    let payload = serde_json::to_value(&payload)?;

    let job_id = state
        .queue()
        .add(payload, delay)
        .await?;

    Ok(Json(EnqueueResponse {
        status: "queued".to_string(),
        job_id,
    }))
}

/// Per-status counts for the bound queue
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsSnapshot>> {
    Ok(Json(state.queue().stats().await?))
}

/// Inspect a single job of the bound queue
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    let queue = state.queue();
    queue
        .get(id)
        .await?
        .filter(|job| job.queue_name == queue.name())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))
}

/// Build the API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(enqueue_job))
        .route("/jobs/{id}", get(get_job))
        .route("/stats", get(get_stats))
        .with_state(state)
}
