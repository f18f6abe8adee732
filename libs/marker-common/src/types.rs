use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduler-assigned job identifier
/// Strictly increasing in submission order, so it doubles as the FIFO key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssessmentId(pub u64);

impl fmt::Display for AssessmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a submission belongs to
/// A group shares one submission identity between its members
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum SubjectKey {
    Individual(String),
    Group(String),
}

impl SubjectKey {
    pub fn individual(username: impl Into<String>) -> Self {
        SubjectKey::Individual(username.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        SubjectKey::Group(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            SubjectKey::Individual(name) | SubjectKey::Group(name) => name,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name().trim().is_empty()
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKey::Individual(name) => write!(f, "user:{}", name),
            SubjectKey::Group(name) => write!(f, "group:{}", name),
        }
    }
}

/// Ownership predicate used by queue-position lookups
pub trait Owner {
    fn owns(&self, subject: &SubjectKey) -> bool;
}

impl Owner for SubjectKey {
    fn owns(&self, subject: &SubjectKey) -> bool {
        self == subject
    }
}

/// A user together with the group they belong to for one assessment
/// Owns both their individual submissions and the group's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Membership {
    pub fn new(user: impl Into<String>, group: Option<String>) -> Self {
        Self {
            user: user.into(),
            group,
        }
    }
}

impl Owner for Membership {
    fn owns(&self, subject: &SubjectKey) -> bool {
        match subject {
            SubjectKey::Individual(name) => *name == self.user,
            SubjectKey::Group(name) => self.group.as_deref() == Some(name.as_str()),
        }
    }
}

/// Strongly-typed language enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Rust,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::Rust => write!(f, "rust"),
        }
    }
}

/// Test Case Definition (Immutable Input)
/// Ordering matters - execution is sequential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u32,
    pub input: String,
    pub expected_output: String,
    pub weight: u32, // for scoring
}

/// Submission request as handed to the scheduler
/// `submission_ref` is opaque here; only the runner interprets it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub subject: SubjectKey,
    pub assessment_id: AssessmentId,
    pub submission_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl JobSpec {
    pub fn new(
        subject: SubjectKey,
        assessment_id: AssessmentId,
        submission_ref: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            assessment_id,
            submission_ref: submission_ref.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Job (Immutable)
/// Write-once: the scheduler tracks state separately and never mutates a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub subject: SubjectKey,
    pub assessment_id: AssessmentId,
    pub submission_ref: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Job {
    pub fn from_spec(id: JobId, spec: JobSpec, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            subject: spec.subject,
            assessment_id: spec.assessment_id,
            submission_ref: spec.submission_ref,
            enqueued_at,
            timeout_ms: spec.timeout_ms,
        }
    }
}

/// Job State Machine
/// Transitions only move forward: Queued -> Running -> Completed | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Per-Test Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    RuntimeError,
    TimeLimitExceeded,
}

/// Per-Test Result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: u32,
    pub status: TestStatus,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
}

/// Scored test run produced by a runner
///
/// ## Scoring Semantics:
/// - score: sum of weights for passed tests
/// - max_score: sum of all test case weights
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub score: u32,
    pub max_score: u32,
    pub results: Vec<TestResult>,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.status == TestStatus::Passed)
    }
}

/// How a job's execution ended
/// Failing tests are still `Marked`; only infrastructure trouble fails a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Marked { report: TestReport },
    InfrastructureError { message: String },
    TimedOut { limit_ms: u64 },
}

impl Outcome {
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Marked { .. } => JobState::Completed,
            Outcome::InfrastructureError { .. } | Outcome::TimedOut { .. } => JobState::Failed,
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Marked { .. } => "marked",
            Outcome::InfrastructureError { .. } => "infrastructure_error",
            Outcome::TimedOut { .. } => "timed_out",
        }
    }

    /// Text shown to the student
    pub fn summary(&self) -> String {
        match self {
            Outcome::Marked { report } => {
                format!("Marked: {} / {}", report.score, report.max_score)
            }
            Outcome::InfrastructureError { .. } => {
                "Your submission could not be marked, please resubmit.".to_string()
            }
            Outcome::TimedOut { limit_ms } => format!(
                "Your submission could not be marked within {}ms, please resubmit.",
                limit_ms
            ),
        }
    }
}

/// Execution Output
/// Written by workers, handed to the result sink, then dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkResult {
    pub job_id: JobId,
    pub subject: SubjectKey,
    pub assessment_id: AssessmentId,
    pub outcome: Outcome,
    /// Student-facing text; a failed job asks for a resubmission
    pub message: String,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl MarkResult {
    pub fn new(job: &Job, outcome: Outcome, duration_ms: u64, finished_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            subject: job.subject.clone(),
            assessment_id: job.assessment_id,
            message: outcome.summary(),
            outcome,
            duration_ms,
            finished_at,
        }
    }

    pub fn state(&self) -> JobState {
        self.outcome.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_key_serialization() {
        let key = SubjectKey::group("team-7");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"kind":"group","name":"team-7"}"#);

        let back: SubjectKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_subject_key_display() {
        assert_eq!(SubjectKey::individual("alice").to_string(), "user:alice");
        assert_eq!(SubjectKey::group("team-7").to_string(), "group:team-7");
    }

    #[test]
    fn test_blank_subject() {
        assert!(SubjectKey::individual("  ").is_blank());
        assert!(!SubjectKey::group("g").is_blank());
    }

    #[test]
    fn test_subject_key_owns_only_itself() {
        let alice = SubjectKey::individual("alice");
        assert!(alice.owns(&SubjectKey::individual("alice")));
        assert!(!alice.owns(&SubjectKey::individual("bob")));
        assert!(!alice.owns(&SubjectKey::group("alice")));
    }

    #[test]
    fn test_membership_owns_user_and_group() {
        let member = Membership::new("alice", Some("team-7".to_string()));
        assert!(member.owns(&SubjectKey::individual("alice")));
        assert!(member.owns(&SubjectKey::group("team-7")));
        assert!(!member.owns(&SubjectKey::group("team-8")));
        assert!(!member.owns(&SubjectKey::individual("bob")));

        let solo = Membership::new("bob", None);
        assert!(solo.owns(&SubjectKey::individual("bob")));
        assert!(!solo.owns(&SubjectKey::group("team-7")));
    }

    #[test]
    fn test_job_state_transitions_are_monotonic() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Failed));

        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Running.can_transition_to(JobState::Queued));
        assert!(!JobState::Completed.can_transition_to(JobState::Running));
        assert!(!JobState::Failed.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_job_state_serialization() {
        let json = serde_json::to_string(&JobState::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn test_outcome_state_mapping() {
        let marked = Outcome::Marked {
            report: TestReport {
                score: 0,
                max_score: 10,
                results: vec![TestResult {
                    test_id: 1,
                    status: TestStatus::Failed,
                    stdout: "5".to_string(),
                    stderr: String::new(),
                    execution_time_ms: 12,
                }],
            },
        };
        // a failing test is a normal mark, not a failed job
        assert_eq!(marked.state(), JobState::Completed);
        assert_eq!(
            Outcome::InfrastructureError {
                message: "boom".to_string()
            }
            .state(),
            JobState::Failed
        );
        assert_eq!(Outcome::TimedOut { limit_ms: 10 }.state(), JobState::Failed);
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let json = serde_json::to_value(Outcome::TimedOut { limit_ms: 500 }).unwrap();
        assert_eq!(json["kind"], "timed_out");
        assert_eq!(json["limit_ms"], 500);
    }

    #[test]
    fn test_failed_outcomes_ask_for_resubmission() {
        let infra = Outcome::InfrastructureError {
            message: "docker unavailable".to_string(),
        };
        assert!(infra.summary().contains("please resubmit"));
        assert!(!infra.summary().contains("docker"));
        assert!(Outcome::TimedOut { limit_ms: 500 }
            .summary()
            .contains("please resubmit"));
    }

    #[test]
    fn test_job_keeps_spec_fields() {
        let spec = JobSpec::new(SubjectKey::individual("alice"), AssessmentId(3), "subs/alice/1")
            .with_timeout_ms(2500);
        let job = Job::from_spec(JobId(9), spec, Utc::now());

        assert_eq!(job.id, JobId(9));
        assert_eq!(job.subject, SubjectKey::individual("alice"));
        assert_eq!(job.assessment_id, AssessmentId(3));
        assert_eq!(job.submission_ref, "subs/alice/1");
        assert_eq!(job.timeout_ms, Some(2500));
    }

    #[test]
    fn test_mark_result_carries_summary() {
        let spec = JobSpec::new(SubjectKey::group("team-2"), AssessmentId(1), "g/2");
        let job = Job::from_spec(JobId(4), spec, Utc::now());
        let outcome = Outcome::InfrastructureError {
            message: "sandbox unavailable".to_string(),
        };
        let result = MarkResult::new(&job, outcome, 12, Utc::now());

        assert_eq!(result.job_id, JobId(4));
        assert_eq!(result.subject, SubjectKey::group("team-2"));
        assert_eq!(result.state(), JobState::Failed);
        assert_eq!(result.message, "Your submission could not be marked, please resubmit.");
    }

    #[test]
    fn test_report_all_passed() {
        let mut report = TestReport::default();
        assert!(report.all_passed());
        report.results.push(TestResult {
            test_id: 1,
            status: TestStatus::TimeLimitExceeded,
            stdout: String::new(),
            stderr: String::new(),
            execution_time_ms: 1000,
        });
        assert!(!report.all_passed());
    }
}
