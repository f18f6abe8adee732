use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use marker_common::{AssessmentId, Job, JobId, JobSpec, Owner};

/// Ordered index of queued jobs
///
/// Keyed by `JobId`, which grows with every push, so iteration order is
/// submission order and a job's position is its rank among queued ids.
/// Not synchronized; the scheduler keeps it behind its state mutex.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: BTreeMap<JobId, Arc<Job>>,
    last_id: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next id and append to the tail
    pub fn push(&mut self, spec: JobSpec, enqueued_at: DateTime<Utc>) -> Arc<Job> {
        self.last_id += 1;
        let job = Arc::new(Job::from_spec(JobId(self.last_id), spec, enqueued_at));
        self.jobs.insert(job.id, Arc::clone(&job));
        job
    }

    /// Take the oldest queued job
    pub fn pop_front(&mut self) -> Option<Arc<Job>> {
        self.jobs.pop_first().map(|(_, job)| job)
    }

    pub fn remove(&mut self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.remove(&id)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// 1-based positions of the owner's jobs for one assessment, ascending
    pub fn positions<O>(&self, owner: &O, assessment_id: AssessmentId) -> Vec<usize>
    where
        O: Owner + ?Sized,
    {
        self.jobs
            .values()
            .enumerate()
            .filter(|(_, job)| job.assessment_id == assessment_id && owner.owns(&job.subject))
            .map(|(idx, _)| idx + 1)
            .collect()
    }

    /// Remove every queued job, oldest first
    pub fn drain(&mut self) -> Vec<Arc<Job>> {
        std::mem::take(&mut self.jobs).into_values().collect()
    }

    /// Put a previously drained job back under its original id
    pub fn restore(&mut self, job: Arc<Job>) {
        debug_assert!(job.id.0 <= self.last_id, "restored job was never issued here");
        self.jobs.insert(job.id, job);
    }

    /// Enqueue time of the head of the queue, for staleness reporting
    pub fn oldest_enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.jobs.values().next().map(|job| job.enqueued_at)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
