// Route definitions for the marker worker

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submit", post(handlers::submit_job))
        .route("/queue/:assessment_id", get(handlers::queue_position))
        .route(
            "/jobs/:id",
            get(handlers::job_status).delete(handlers::cancel_job),
        )
        .route("/admin/refresh", post(handlers::refresh_queue))
        .route("/stats", get(handlers::stats))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
