//! Runner - calling contract between workers and the execution backend
//!
//! The scheduler knows nothing about compilers, containers or scoring.
//! It hands a job and a deadline to a `Runner` and turns whatever comes
//! back (a report, an error, a panic, or silence past the deadline) into
//! an `Outcome`.
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use marker_common::{Job, Outcome, TestReport};

use crate::error::RunnerError;

/// Execution backend
///
/// Implementations must:
/// 1. Produce a `TestReport` for the job's submission, failing tests included
/// 2. Return `RunnerError` for anything that prevented marking
/// 3. Aim to finish before `deadline`; the worker stops waiting at the
///    deadline and cancels the call
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    async fn run(&self, job: &Job, deadline: Instant) -> Result<TestReport, RunnerError>;
}

/// Run one job to an outcome
///
/// The runner call lives in its own task so a panic stays inside that task,
/// and the task is aborted when the timeout fires.
pub(crate) async fn invoke(runner: Arc<dyn Runner>, job: Arc<Job>, timeout: Duration) -> Outcome {
    let deadline = Instant::now() + timeout;
    let task_job = Arc::clone(&job);
    let mut handle = tokio::spawn(async move { runner.run(&task_job, deadline).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(report))) => Outcome::Marked { report },
        Ok(Ok(Err(err))) => {
            tracing::warn!(job_id = %job.id, error = %err, "Runner reported an execution failure");
            Outcome::InfrastructureError {
                message: err.to_string(),
            }
        }
        Ok(Err(join_err)) => {
            let message = if join_err.is_panic() {
                format!("runner panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "runner task was cancelled".to_string()
            };
            tracing::error!(job_id = %job.id, %message, "Runner crashed");
            Outcome::InfrastructureError { message }
        }
        Err(_) => {
            handle.abort();
            tracing::warn!(
                job_id = %job.id,
                timeout_ms = timeout.as_millis() as u64,
                "Runner exceeded its deadline; execution cancelled"
            );
            Outcome::TimedOut {
                limit_ms: timeout.as_millis() as u64,
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
