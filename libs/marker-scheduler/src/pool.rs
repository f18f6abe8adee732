//! Worker pool
//!
//! `core_size` workers live for the whole life of the scheduler. Overflow
//! workers, up to `max_size`, are spawned when queued jobs outnumber idle
//! workers and retire after `keep_alive` without work. Each worker runs one
//! job at a time, so the live worker count bounds concurrent executions.
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use marker_common::{Config, ConfigError, Job, JobId, JobState, MarkResult};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::metrics;
use crate::runner;
use crate::scheduler::Shared;

/// Pool sizing and execution deadlines
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub keep_alive: Duration,
}

impl PoolConfig {
    /// `max_size` is raised to `core_size` when smaller
    pub fn new(core_size: usize, max_size: usize) -> Self {
        Self {
            core_size,
            max_size: max_size.max(core_size),
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(120),
            keep_alive: Duration::from_secs(60),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self.max_timeout = self.max_timeout.max(timeout);
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_size == 0 {
            return Err(ConfigError::ZeroCoreSize);
        }
        Ok(())
    }

    /// Deadline budget for one job: its own override capped at `max_timeout`
    pub fn timeout_for(&self, job: &Job) -> Duration {
        match job.timeout_ms {
            Some(ms) => Duration::from_millis(ms).min(self.max_timeout),
            None => self.default_timeout,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl From<&Config> for PoolConfig {
    fn from(config: &Config) -> Self {
        PoolConfig::new(config.core_size, config.max_size)
            .with_max_timeout(Duration::from_millis(config.max_timeout_ms))
            .with_default_timeout(Duration::from_millis(config.default_timeout_ms))
            .with_keep_alive(Duration::from_millis(config.keep_alive_ms))
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub queued: usize,
    pub running: usize,
    pub live_workers: usize,
    pub idle_workers: usize,
    /// When the job at the head of the queue was submitted
    pub oldest_queued_at: Option<DateTime<Utc>>,
}

/// Exclusive hold on one execution slot
///
/// Dropping the lease evicts the job from the running set, whichever way
/// the execution ended.
struct SlotLease<'a> {
    shared: &'a Shared,
    job_id: JobId,
}

impl<'a> SlotLease<'a> {
    fn new(shared: &'a Shared, job_id: JobId) -> Self {
        Self { shared, job_id }
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.running.remove(&self.job_id);
        state.publish_gauges();
    }
}

/// Start a worker for a slot already claimed in `State`
///
/// Once `shutdown` has begun the claim is released instead, so no worker
/// can appear after the handles were drained. Lock order is handles, then
/// state.
pub(crate) fn spawn_worker(shared: &Arc<Shared>, worker_id: usize) {
    let mut workers = shared.worker_handles();
    {
        let mut state = shared.lock();
        if state.shutting_down {
            state.live_workers -= 1;
            state.publish_gauges();
            debug!(worker = worker_id, "Skipped worker spawn during shutdown");
            return;
        }
    }
    let handle = shared
        .runtime
        .spawn(worker_loop(Arc::clone(shared), worker_id));
    workers.retain(|h| !h.is_finished());
    workers.push(handle);
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    debug!(worker = worker_id, "Worker started");

    while let Some(job) = next_job(&shared, worker_id).await {
        let lease = SlotLease::new(&shared, job.id);
        let waited_ms = (Utc::now() - job.enqueued_at).num_milliseconds().max(0);
        info!(
            job_id = %job.id,
            subject = %job.subject,
            assessment_id = %job.assessment_id,
            worker = worker_id,
            waited_ms,
            "Dispatched job"
        );

        let timeout = shared.config.timeout_for(&job);
        let started = Instant::now();
        let outcome = runner::invoke(Arc::clone(&shared.runner), Arc::clone(&job), timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        drop(lease);

        debug_assert!(JobState::Running.can_transition_to(outcome.state()));
        metrics::record_finished(outcome.label(), duration_ms as f64);
        info!(
            job_id = %job.id,
            worker = worker_id,
            state = %outcome.state(),
            outcome = outcome.label(),
            duration_ms,
            "Job finished"
        );

        let result = MarkResult::new(&job, outcome, duration_ms, Utc::now());
        forward(&shared, result).await;
    }

    debug!(worker = worker_id, "Worker stopped");
}

/// Hand a result to the sink; sink failures are logged, never propagated
async fn forward(shared: &Shared, result: MarkResult) {
    let job_id = result.job_id;
    let stored = std::panic::AssertUnwindSafe(shared.sink.store(result))
        .catch_unwind()
        .await;
    match stored {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(job_id = %job_id, error = %e, "Failed to store result"),
        Err(_) => error!(job_id = %job_id, "Result sink panicked"),
    }
}

/// Block until a job is available, or return `None` when this worker
/// should exit (shutdown, or an overflow worker idle past `keep_alive`)
async fn next_job(shared: &Shared, worker_id: usize) -> Option<Arc<Job>> {
    loop {
        let notified = shared.work_ready.notified();
        tokio::pin!(notified);
        {
            let mut state = shared.lock();
            if state.shutting_down {
                state.live_workers -= 1;
                state.publish_gauges();
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                state.running.insert(job.id, Arc::clone(&job));
                let more = !state.queue.is_empty();
                state.publish_gauges();
                drop(state);
                if more {
                    shared.work_ready.notify_one();
                }
                return Some(job);
            }
            state.idle_workers += 1;
            // register before the lock is released so no wakeup is lost
            notified.as_mut().enable();
        }

        let woken = tokio::time::timeout(shared.config.keep_alive, notified)
            .await
            .is_ok();

        let mut state = shared.lock();
        state.idle_workers -= 1;
        if !woken
            && state.queue.is_empty()
            && !state.shutting_down
            && state.live_workers > shared.config.core_size
        {
            state.live_workers -= 1;
            state.publish_gauges();
            debug!(
                worker = worker_id,
                live_workers = state.live_workers,
                "Retiring idle overflow worker"
            );
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_common::{AssessmentId, JobSpec, SubjectKey};

    fn job(timeout_ms: Option<u64>) -> Job {
        let mut spec = JobSpec::new(SubjectKey::individual("alice"), AssessmentId(1), "s");
        spec.timeout_ms = timeout_ms;
        Job::from_spec(JobId(1), spec, Utc::now())
    }

    #[test]
    fn test_max_size_raised_to_core() {
        let config = PoolConfig::new(4, 2);
        assert_eq!(config.core_size, 4);
        assert_eq!(config.max_size, 4);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        assert_eq!(PoolConfig::new(0, 3).validate(), Err(ConfigError::ZeroCoreSize));
        assert!(PoolConfig::new(1, 3).validate().is_ok());
    }

    #[test]
    fn test_timeout_for_uses_default_and_caps_override() {
        let config = PoolConfig::new(1, 1)
            .with_default_timeout(Duration::from_secs(10))
            .with_max_timeout(Duration::from_secs(20));

        assert_eq!(config.timeout_for(&job(None)), Duration::from_secs(10));
        assert_eq!(config.timeout_for(&job(Some(500))), Duration::from_millis(500));
        assert_eq!(config.timeout_for(&job(Some(60_000))), Duration::from_secs(20));
    }

    #[test]
    fn test_from_config() {
        let config = Config::from_lookup(|key| match key {
            "EXECUTION_CORE_SIZE" => Some("2".to_string()),
            "EXECUTION_MAX_SIZE" => Some("5".to_string()),
            "DEFAULT_TIMEOUT_MS" => Some("1500".to_string()),
            "WORKER_KEEP_ALIVE_MS" => Some("250".to_string()),
            _ => None,
        });
        let pool = PoolConfig::from(&config);

        assert_eq!(pool.core_size, 2);
        assert_eq!(pool.max_size, 5);
        assert_eq!(pool.default_timeout, Duration::from_millis(1500));
        assert_eq!(pool.max_timeout, Duration::from_millis(120_000));
        assert_eq!(pool.keep_alive, Duration::from_millis(250));
    }
}
