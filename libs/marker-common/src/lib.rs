pub mod config;
pub mod redis;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError, EngineKind};
pub use types::{
    AssessmentId, Job, JobId, JobSpec, JobState, Language, MarkResult, Membership, Outcome,
    Owner, SubjectKey, TestReport,
};
