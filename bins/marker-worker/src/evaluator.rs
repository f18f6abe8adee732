/// Test Evaluator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Compare raw execution outputs against expected outputs and assign scores.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or language runtimes
/// - Knows nothing about the queue or the result store
/// - Pure function: (test cases, execution outputs) → report
///
/// **Scoring Rules:**
/// - Each test case has a weight
/// - score = sum of weights for Passed tests
/// - max_score = sum of all test case weights
/// - Both sums saturate at u32::MAX
/// - A report with score 0 is still a marked submission

use marker_common::types::{TestCase, TestResult, TestStatus};
use marker_common::TestReport;
use tracing::{debug, warn};

/// Raw execution output for a single test case
/// Produced by ExecutionEngine, consumed by Evaluator
#[derive(Debug, Clone)]
pub struct TestExecutionOutput {
    pub test_id: u32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub runtime_error: bool,
}

impl TestExecutionOutput {
    /// Placeholder for a test that never ran because the job ran out of time
    pub fn skipped(test_id: u32) -> Self {
        TestExecutionOutput {
            test_id,
            stdout: String::new(),
            stderr: String::new(),
            execution_time_ms: 0,
            timed_out: true,
            runtime_error: false,
        }
    }
}

fn status_of(output: &TestExecutionOutput, test_case: &TestCase) -> TestStatus {
    if output.runtime_error {
        TestStatus::RuntimeError
    } else if output.timed_out {
        TestStatus::TimeLimitExceeded
    } else if output.stdout.trim() == test_case.expected_output.trim() {
        TestStatus::Passed
    } else {
        TestStatus::Failed
    }
}

/// Score execution outputs against the assessment's test cases
///
/// Outputs whose test id has no matching test case are ignored.
pub fn evaluate(test_cases: &[TestCase], outputs: Vec<TestExecutionOutput>) -> TestReport {
    let max_score = test_cases
        .iter()
        .fold(0u32, |total, tc| total.saturating_add(tc.weight));
    let mut score = 0u32;
    let mut results = Vec::with_capacity(outputs.len());

    for output in outputs {
        let Some(test_case) = test_cases.iter().find(|tc| tc.id == output.test_id) else {
            warn!(test_id = output.test_id, "No test case for execution output");
            continue;
        };

        let status = status_of(&output, test_case);
        if status == TestStatus::Passed {
            score = score.saturating_add(test_case.weight);
        }

        debug!(
            test_id = test_case.id,
            weight = test_case.weight,
            status = ?status,
            execution_time_ms = output.execution_time_ms,
            "Evaluated test"
        );

        results.push(TestResult {
            test_id: output.test_id,
            status,
            stdout: output.stdout,
            stderr: output.stderr,
            execution_time_ms: output.execution_time_ms,
        });
    }

    TestReport {
        score,
        max_score,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: u32, expected: &str, weight: u32) -> TestCase {
        TestCase {
            id,
            input: "input".to_string(),
            expected_output: expected.to_string(),
            weight,
        }
    }

    fn output(test_id: u32, stdout: &str) -> TestExecutionOutput {
        TestExecutionOutput {
            test_id,
            stdout: stdout.to_string(),
            stderr: String::new(),
            execution_time_ms: 10,
            timed_out: false,
            runtime_error: false,
        }
    }

    #[test]
    fn test_all_pass() {
        let cases = vec![case(1, "120", 10), case(2, "6", 15)];
        let report = evaluate(&cases, vec![output(1, "120"), output(2, "6")]);

        assert_eq!(report.score, 25);
        assert_eq!(report.max_score, 25);
        assert!(report.all_passed());
    }

    #[test]
    fn test_partial_pass() {
        let cases = vec![case(1, "correct", 20), case(2, "wrong", 30)];
        let report = evaluate(&cases, vec![output(1, "correct"), output(2, "incorrect")]);

        assert_eq!(report.score, 20);
        assert_eq!(report.max_score, 50);
        assert_eq!(report.results[0].status, TestStatus::Passed);
        assert_eq!(report.results[1].status, TestStatus::Failed);
    }

    #[test]
    fn test_runtime_error() {
        let cases = vec![case(1, "output", 10)];
        let mut crashed = output(1, "");
        crashed.stderr = "ZeroDivisionError: division by zero".to_string();
        crashed.runtime_error = true;

        let report = evaluate(&cases, vec![crashed]);
        assert_eq!(report.score, 0);
        assert_eq!(report.results[0].status, TestStatus::RuntimeError);
    }

    #[test]
    fn test_skipped_tests_count_as_timeouts() {
        let cases = vec![case(1, "a", 5), case(2, "b", 5)];
        let report = evaluate(&cases, vec![output(1, "a"), TestExecutionOutput::skipped(2)]);

        assert_eq!(report.score, 5);
        assert_eq!(report.max_score, 10);
        assert_eq!(report.results[1].status, TestStatus::TimeLimitExceeded);
    }

    #[test]
    fn test_whitespace_trimming() {
        let cases = vec![case(1, "hello", 10)];
        let report = evaluate(&cases, vec![output(1, "  hello  \n")]);
        assert_eq!(report.score, 10);
    }

    #[test]
    fn test_unmatched_output_ignored() {
        let cases = vec![case(1, "x", 10)];
        let report = evaluate(&cases, vec![output(9, "x")]);
        assert!(report.results.is_empty());
        assert_eq!(report.max_score, 10);
    }

    #[test]
    fn test_huge_weights_saturate() {
        let cases = vec![case(1, "a", u32::MAX), case(2, "b", u32::MAX)];
        let report = evaluate(&cases, vec![output(1, "a"), output(2, "b")]);

        assert_eq!(report.score, u32::MAX);
        assert_eq!(report.max_score, u32::MAX);
        assert!(report.all_passed());
    }
}
