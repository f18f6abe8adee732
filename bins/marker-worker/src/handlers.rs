// HTTP route handlers for the marker worker

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use marker_common::{AssessmentId, JobId, JobSpec, JobState, Membership, SubjectKey};
use marker_scheduler::{metrics, SubmitError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub subject: SubjectKey,
    pub assessment_id: AssessmentId,
    pub submission_ref: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub user: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub positions: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Student-facing text for a set of queue positions
pub fn position_message(positions: &[usize]) -> Option<String> {
    match positions {
        [] => None,
        [only] => Some(format!(
            "Your submission is currently at position {} in the testing queue.",
            only
        )),
        [init @ .., last] => {
            let init: Vec<String> = init.iter().map(|p| p.to_string()).collect();
            Some(format!(
                "Your submissions are currently at positions {} and {} in the testing queue.",
                init.join(", "),
                last
            ))
        }
    }
}

/// POST /submit - Queue a submission for marking
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let mut spec = JobSpec::new(payload.subject, payload.assessment_id, payload.submission_ref);
    spec.timeout_ms = payload.timeout_ms;

    match state.scheduler.submit(spec) {
        Ok(job_id) => (StatusCode::CREATED, Json(SubmitResponse { job_id })).into_response(),
        Err(SubmitError::ShuttingDown) => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, SubmitError::ShuttingDown.to_string())
        }
        Err(e) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// GET /queue/:assessment_id?user=..&group=.. - Where a student's work sits
pub async fn queue_position(
    State(state): State<Arc<AppState>>,
    Path(assessment_id): Path<u64>,
    Query(query): Query<QueueQuery>,
) -> Json<QueueResponse> {
    let member = Membership::new(query.user, query.group.filter(|g| !g.trim().is_empty()));
    let positions = state
        .scheduler
        .queue_position(&member, AssessmentId(assessment_id));
    let message = position_message(&positions);
    Json(QueueResponse { positions, message })
}

/// GET /jobs/:id - State of a queued or running job
pub async fn job_status(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.scheduler.job_state(JobId(id)) {
        Some(job_state) => Json(json!({ "job_id": id, "state": job_state })).into_response(),
        None => error_body(StatusCode::NOT_FOUND, format!("job {} is not pending", id)),
    }
}

/// DELETE /jobs/:id - Withdraw a queued job
pub async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    let job_id = JobId(id);
    if state.scheduler.cancel(job_id) {
        return Json(json!({ "job_id": id, "cancelled": true })).into_response();
    }
    match state.scheduler.job_state(job_id) {
        Some(JobState::Running) => {
            error_body(StatusCode::CONFLICT, format!("job {} is already running", id))
        }
        _ => error_body(StatusCode::NOT_FOUND, format!("job {} is not queued", id)),
    }
}

/// POST /admin/refresh - Drain the queue through the refresher
pub async fn refresh_queue(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.drain_and_refresh())
}

/// GET /stats - Pool and queue counters
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.scheduler.stats();
    let config = state.scheduler.config();
    Json(json!({
        "queued": stats.queued,
        "running": stats.running,
        "live_workers": stats.live_workers,
        "idle_workers": stats.idle_workers,
        "oldest_queued_at": stats.oldest_queued_at,
        "core_size": config.core_size,
        "max_size": config.max_size,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
