//! Execution scheduler
//!
//! Sole owner of pending work. All queue, running-set and worker accounting
//! lives in one `State` behind one mutex, so submission, dispatch,
//! cancellation and position queries each see a single consistent snapshot.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use marker_common::{AssessmentId, Job, JobId, JobSpec, JobState, Owner};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StartError, SubmitError};
use crate::metrics;
use crate::pool::{self, PoolConfig, PoolStats};
use crate::queue::JobQueue;
use crate::runner::Runner;
use crate::sink::ResultSink;

/// What a refresh does with one drained job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    Keep,
    /// Re-enqueue pointing at a different submission artifact
    Resubmit(String),
    Drop,
}

/// Re-evaluates queued work during `drain_and_refresh`
///
/// Called with the scheduler lock held; keep it cheap and non-blocking.
pub trait JobRefresher: Send + Sync + 'static {
    fn refresh(&self, job: &Job) -> Refresh;
}

impl<F> JobRefresher for F
where
    F: Fn(&Job) -> Refresh + Send + Sync + 'static,
{
    fn refresh(&self, job: &Job) -> Refresh {
        self(job)
    }
}

/// Default refresher: every queued job survives unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepAll;

impl JobRefresher for KeepAll {
    fn refresh(&self, _job: &Job) -> Refresh {
        Refresh::Keep
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub requeued: usize,
    pub resubmitted: usize,
    pub dropped: usize,
}

pub(crate) struct State {
    pub(crate) queue: JobQueue,
    pub(crate) running: BTreeMap<JobId, Arc<Job>>,
    pub(crate) live_workers: usize,
    pub(crate) idle_workers: usize,
    pub(crate) next_worker_id: usize,
    pub(crate) shutting_down: bool,
}

impl State {
    /// Reserve an overflow worker if queued work outnumbers idle workers
    fn claim_overflow_worker(&mut self, max_size: usize) -> Option<usize> {
        if self.shutting_down
            || self.queue.len() <= self.idle_workers
            || self.live_workers >= max_size
        {
            return None;
        }
        Some(self.claim_worker())
    }

    fn claim_worker(&mut self) -> usize {
        self.live_workers += 1;
        self.next_worker_id += 1;
        self.next_worker_id
    }

    pub(crate) fn publish_gauges(&self) {
        metrics::update_pool_gauges(self.queue.len(), self.running.len(), self.live_workers);
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    pub(crate) work_ready: Notify,
    pub(crate) config: PoolConfig,
    pub(crate) runner: Arc<dyn Runner>,
    pub(crate) sink: Arc<dyn ResultSink>,
    refresher: Box<dyn JobRefresher>,
    pub(crate) runtime: Handle,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn worker_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running scheduler and its worker pool
/// Cheap to clone; all clones drive the same queue
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Scheduler {
    /// Start the scheduler and its core workers on the current tokio runtime
    pub fn start(
        config: PoolConfig,
        runner: Arc<dyn Runner>,
        sink: Arc<dyn ResultSink>,
    ) -> std::result::Result<Self, StartError> {
        Self::start_with_refresher(config, runner, sink, KeepAll)
    }

    pub fn start_with_refresher<F>(
        config: PoolConfig,
        runner: Arc<dyn Runner>,
        sink: Arc<dyn ResultSink>,
        refresher: F,
    ) -> std::result::Result<Self, StartError>
    where
        F: JobRefresher,
    {
        config.validate()?;
        let runtime = Handle::try_current()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: JobQueue::new(),
                running: BTreeMap::new(),
                live_workers: 0,
                idle_workers: 0,
                next_worker_id: 0,
                shutting_down: false,
            }),
            work_ready: Notify::new(),
            config,
            runner,
            sink,
            refresher: Box::new(refresher),
            runtime,
            workers: Mutex::new(Vec::new()),
        });

        let core_ids: Vec<usize> = {
            let mut state = shared.lock();
            let ids = (0..shared.config.core_size)
                .map(|_| state.claim_worker())
                .collect();
            state.publish_gauges();
            ids
        };
        for worker_id in core_ids {
            pool::spawn_worker(&shared, worker_id);
        }

        info!(
            core_size = shared.config.core_size,
            max_size = shared.config.max_size,
            default_timeout_ms = shared.config.default_timeout.as_millis() as u64,
            "Scheduler started"
        );

        Ok(Self { shared })
    }

    /// Append a job to the tail of the queue
    ///
    /// Never blocks. Rejects only malformed jobs and submissions made after
    /// `shutdown`.
    pub fn submit(&self, spec: JobSpec) -> Result<JobId> {
        if let Err(e) = validate(&spec) {
            metrics::record_rejected(e.reason());
            warn!(error = %e, subject = %spec.subject, "Rejected submission");
            return Err(e);
        }

        let (job, overflow) = {
            let mut state = self.shared.lock();
            if state.shutting_down {
                metrics::record_rejected(SubmitError::ShuttingDown.reason());
                return Err(SubmitError::ShuttingDown);
            }
            let job = state.queue.push(spec, Utc::now());
            let overflow = state.claim_overflow_worker(self.shared.config.max_size);
            state.publish_gauges();
            (job, overflow)
        };

        self.shared.work_ready.notify_one();
        if let Some(worker_id) = overflow {
            debug!(worker = worker_id, "Spawning overflow worker");
            pool::spawn_worker(&self.shared, worker_id);
        }

        metrics::record_submitted();
        info!(
            job_id = %job.id,
            subject = %job.subject,
            assessment_id = %job.assessment_id,
            "Job queued"
        );
        Ok(job.id)
    }

    /// 1-based positions of every queued job the owner holds for this
    /// assessment, ascending; empty once all of them have been dispatched
    pub fn queue_position<O>(&self, owner: &O, assessment_id: AssessmentId) -> Vec<usize>
    where
        O: Owner + ?Sized,
    {
        self.shared.lock().queue.positions(owner, assessment_id)
    }

    /// Withdraw a job that has not been dispatched yet
    pub fn cancel(&self, job_id: JobId) -> bool {
        let removed = {
            let mut state = self.shared.lock();
            let removed = state.queue.remove(job_id);
            state.publish_gauges();
            removed
        };

        match removed {
            Some(job) => {
                metrics::record_cancelled();
                info!(
                    job_id = %job.id,
                    subject = %job.subject,
                    assessment_id = %job.assessment_id,
                    "Job cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Drain every queued job through the refresher and re-enqueue the
    /// survivors under their original ids, then wake the pool
    pub fn drain_and_refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut spawn = Vec::new();
        {
            let mut state = self.shared.lock();
            for job in state.queue.drain() {
                match self.shared.refresher.refresh(&job) {
                    Refresh::Keep => {
                        report.requeued += 1;
                        state.queue.restore(job);
                    }
                    Refresh::Resubmit(submission_ref) => {
                        report.requeued += 1;
                        report.resubmitted += 1;
                        let mut updated = (*job).clone();
                        updated.submission_ref = submission_ref;
                        state.queue.restore(Arc::new(updated));
                    }
                    Refresh::Drop => {
                        report.dropped += 1;
                        debug!(job_id = %job.id, subject = %job.subject, "Dropped job on refresh");
                    }
                }
            }
            while let Some(worker_id) = state.claim_overflow_worker(self.shared.config.max_size) {
                spawn.push(worker_id);
            }
            state.publish_gauges();
        }

        self.shared.work_ready.notify_waiters();
        self.shared.work_ready.notify_one();
        for worker_id in spawn {
            pool::spawn_worker(&self.shared, worker_id);
        }

        info!(
            requeued = report.requeued,
            resubmitted = report.resubmitted,
            dropped = report.dropped,
            "Queue refreshed"
        );
        report
    }

    /// State of a live job; `None` once it has finished or been cancelled
    pub fn job_state(&self, job_id: JobId) -> Option<JobState> {
        let state = self.shared.lock();
        if state.queue.contains(job_id) {
            Some(JobState::Queued)
        } else if state.running.contains_key(&job_id) {
            Some(JobState::Running)
        } else {
            None
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            queued: state.queue.len(),
            running: state.running.len(),
            live_workers: state.live_workers,
            idle_workers: state.idle_workers,
            oldest_queued_at: state.queue.oldest_enqueued_at(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Stop dispatching, let running jobs finish, and join every worker
    ///
    /// Returns how many queued jobs were abandoned.
    pub async fn shutdown(&self) -> usize {
        let abandoned = {
            let mut state = self.shared.lock();
            state.shutting_down = true;
            state.queue.len()
        };
        self.shared.work_ready.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.shared.worker_handles().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker ended abnormally");
            }
        }

        info!(abandoned, "Scheduler stopped");
        abandoned
    }
}

fn validate(spec: &JobSpec) -> Result<()> {
    if spec.subject.is_blank() {
        return Err(SubmitError::MissingSubject);
    }
    if spec.assessment_id.0 == 0 {
        return Err(SubmitError::MissingAssessment);
    }
    if spec.submission_ref.trim().is_empty() {
        return Err(SubmitError::MissingSubmission);
    }
    if spec.timeout_ms == Some(0) {
        return Err(SubmitError::InvalidTimeout);
    }
    Ok(())
}
