use std::sync::Mutex;

use async_trait::async_trait;
use marker_common::MarkResult;

/// Durable destination for finished results
/// The scheduler forgets a result as soon as `store` returns
#[async_trait]
pub trait ResultSink: Send + Sync + 'static {
    async fn store(&self, result: MarkResult) -> anyhow::Result<()>;
}

/// Sink that only logs results
/// Used when no durable store is configured
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn store(&self, result: MarkResult) -> anyhow::Result<()> {
        tracing::info!(
            job_id = %result.job_id,
            subject = %result.subject,
            assessment_id = %result.assessment_id,
            outcome = result.outcome.label(),
            duration_ms = result.duration_ms,
            message = %result.message,
            "Result recorded"
        );
        Ok(())
    }
}

/// Keeps results in memory, in arrival order
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<MarkResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<MarkResult> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(&self, result: MarkResult) -> anyhow::Result<()> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(result);
        Ok(())
    }
}
