use crate::types::JobId;

/// Redis key semantics - defines only naming, not runtime logic
/// Keeps the worker and anything reading results from drifting apart

pub const RESULT_PREFIX: &str = "marker:result";
pub const COMPLETIONS_CHANNEL: &str = "marker:events:completions";

/// Generate result key for a job
pub fn result_key(job_id: JobId) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}
