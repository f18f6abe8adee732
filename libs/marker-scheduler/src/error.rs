use marker_common::{AssessmentId, ConfigError};
use thiserror::Error;

/// Rejections raised synchronously by `Scheduler::submit`
/// A rejected job never enters the queue
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    #[error("job has no subject")]
    MissingSubject,

    #[error("job has no assessment reference")]
    MissingAssessment,

    #[error("job has no submission reference")]
    MissingSubmission,

    #[error("job timeout must be positive")]
    InvalidTimeout,

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    /// Label used for the rejection metric
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::MissingSubject => "missing_subject",
            SubmitError::MissingAssessment => "missing_assessment",
            SubmitError::MissingSubmission => "missing_submission",
            SubmitError::InvalidTimeout => "invalid_timeout",
            SubmitError::ShuttingDown => "shutting_down",
        }
    }
}

/// Failures reported by a runner
/// Every variant ends the job as an infrastructure error
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("submission {0:?} is unavailable")]
    SubmissionUnavailable(String),

    #[error("assessment {0} is not configured for marking")]
    UnknownAssessment(AssessmentId),

    #[error("execution backend failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scheduler must be started inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, SubmitError>;
