// Redis-backed result store

use anyhow::{Context, Result};
use async_trait::async_trait;
use marker_common::redis::{result_key, COMPLETIONS_CHANNEL};
use marker_common::MarkResult;
use marker_scheduler::ResultSink;
use redis::aio::ConnectionManager;
use serde_json::json;
use tracing::debug;

/// Stores each result under `marker:result:{job_id}` with a TTL and
/// announces it on the completions channel
#[derive(Clone)]
pub struct RedisResultSink {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisResultSink {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;
        Ok(Self { conn, ttl_secs })
    }
}

/// Payload published on the completions channel
fn completion_event(result: &MarkResult) -> serde_json::Value {
    json!({
        "job_id": result.job_id,
        "subject": result.subject,
        "assessment_id": result.assessment_id,
        "state": result.state().to_string(),
        "outcome": result.outcome.label(),
        "message": result.message,
        "duration_ms": result.duration_ms,
    })
}

#[async_trait]
impl ResultSink for RedisResultSink {
    async fn store(&self, result: MarkResult) -> Result<()> {
        let key = result_key(result.job_id);
        let payload = serde_json::to_string(&result)?;
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(&key)
            .arg(&payload)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .with_context(|| format!("Failed to store {}", key))?;

        redis::cmd("PUBLISH")
            .arg(COMPLETIONS_CHANNEL)
            .arg(completion_event(&result).to_string())
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Failed to publish completion event")?;

        debug!(job_id = %result.job_id, key = %key, "Result stored in Redis");
        Ok(())
    }
}
