// Runner backed by an execution engine and the assessment catalog

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use marker_common::{Job, TestReport};
use marker_scheduler::{Refresh, Runner, RunnerError};
use tracing::{info, warn};

use crate::catalog::{AssessmentCatalog, AssessmentSpec};
use crate::engine::{self, ExecutionEngine};
use crate::evaluator;

/// Marks a submission by executing it against its assessment's test cases
///
/// `submission_ref` is a path on local disk: either the source file itself,
/// or a directory holding the assessment's `source_file`.
pub struct EngineRunner {
    engine: Arc<dyn ExecutionEngine>,
    catalog: Arc<AssessmentCatalog>,
}

impl EngineRunner {
    pub fn new(engine: Arc<dyn ExecutionEngine>, catalog: Arc<AssessmentCatalog>) -> Self {
        Self { engine, catalog }
    }
}

fn source_path(submission_ref: &str, assessment: &AssessmentSpec) -> PathBuf {
    let path = Path::new(submission_ref);
    if path.is_dir() {
        path.join(&assessment.source_file)
    } else {
        path.to_path_buf()
    }
}

#[async_trait]
impl Runner for EngineRunner {
    async fn run(&self, job: &Job, deadline: Instant) -> Result<TestReport, RunnerError> {
        let assessment = self
            .catalog
            .get(job.assessment_id)
            .ok_or(RunnerError::UnknownAssessment(job.assessment_id))?;

        let path = source_path(&job.submission_ref, assessment);
        let source_code = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| RunnerError::SubmissionUnavailable(path.display().to_string()))?;

        let outputs = engine::execute_job(
            self.engine.as_ref(),
            assessment.language,
            &source_code,
            &assessment.test_cases,
            assessment.time_limit_ms,
            deadline,
        )
        .await
        .map_err(|e| RunnerError::Backend(format!("{:#}", e)))?;

        let report = evaluator::evaluate(&assessment.test_cases, outputs);
        info!(
            job_id = %job.id,
            assessment_id = %job.assessment_id,
            language = %assessment.language,
            score = report.score,
            max_score = report.max_score,
            "Submission marked"
        );
        Ok(report)
    }
}

/// Refresh policy for queued jobs: drop those whose submission is gone
pub fn refresh_submission(job: &Job) -> Refresh {
    if Path::new(&job.submission_ref).exists() {
        Refresh::Keep
    } else {
        warn!(
            job_id = %job.id,
            subject = %job.subject,
            submission_ref = %job.submission_ref,
            "Submission no longer on disk"
        );
        Refresh::Drop
    }
}
