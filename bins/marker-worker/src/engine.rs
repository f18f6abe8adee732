/// Execution Engine - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Execute source code with test inputs and capture raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker, local, sandbox, etc.)
/// - Engine does NOT know scoring rules
/// - Engine returns raw outputs for the Evaluator to judge
///
/// A failure of the engine itself (daemon unreachable, image missing) is an
/// `Err`; a submission that crashes or overruns is a normal output.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use marker_common::types::TestCase;
use marker_common::Language;
use tracing::{debug, warn};

use crate::evaluator::TestExecutionOutput;

/// Execution engine trait
///
/// Any implementation must guarantee:
/// 1. Execute source_code with the given input
/// 2. Respect timeout_ms
/// 3. Capture stdout/stderr
/// 4. Flag timeouts and runtime errors
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        language: Language,
        source_code: &str,
        input: &str,
        timeout_ms: u64,
    ) -> Result<TestExecutionOutput>;
}

/// Dummy execution engine for local runs and tests
///
/// **Dummy Execution Rules:**
/// 1. source_code is ignored
/// 2. stdout = input.trim() (echo semantics)
/// 3. Never times out, never has runtime errors
/// 4. Fixed execution time: 5ms
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyEngine;

impl DummyEngine {
    pub fn new() -> Self {
        DummyEngine
    }
}

#[async_trait]
impl ExecutionEngine for DummyEngine {
    async fn execute(
        &self,
        _language: Language,
        _source_code: &str,
        input: &str,
        _timeout_ms: u64,
    ) -> Result<TestExecutionOutput> {
        Ok(TestExecutionOutput {
            test_id: 0, // set by execute_job
            stdout: input.trim().to_string(),
            stderr: String::new(),
            execution_time_ms: 5,
            timed_out: false,
            runtime_error: false,
        })
    }
}

/// Run every test case of a submission, stopping at `deadline`
///
/// Each test gets the smaller of `time_limit_ms` and what is left of the
/// job's budget. Tests that cannot start before the deadline are reported
/// as timed out without being executed.
pub async fn execute_job(
    engine: &dyn ExecutionEngine,
    language: Language,
    source_code: &str,
    test_cases: &[TestCase],
    time_limit_ms: u64,
    deadline: Instant,
) -> Result<Vec<TestExecutionOutput>> {
    let mut outputs = Vec::with_capacity(test_cases.len());

    for test_case in test_cases {
        let remaining_ms = deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as u64;
        if remaining_ms == 0 {
            debug!(test_id = test_case.id, "Job budget exhausted, skipping test");
            outputs.push(TestExecutionOutput::skipped(test_case.id));
            continue;
        }

        let mut output = engine
            .execute(
                language,
                source_code,
                &test_case.input,
                time_limit_ms.min(remaining_ms),
            )
            .await
            .with_context(|| format!("test {} could not be executed", test_case.id))?;
        output.test_id = test_case.id;

        debug!(
            test_id = test_case.id,
            execution_time_ms = output.execution_time_ms,
            timed_out = output.timed_out,
            runtime_error = output.runtime_error,
            "Executed test"
        );
        outputs.push(output);
    }

    Ok(outputs)
}

/// Docker-based execution engine
///
/// **Docker Execution Rules:**
/// 1. Pulls the language image if not present
/// 2. Creates a container with network disabled and CPU/memory limits
/// 3. Injects source code and test input as base64 env vars
/// 4. Captures stdout/stderr, kills the container on timeout
/// 5. Force-removes the container afterwards, even when the job is aborted
pub struct DockerEngine {
    docker: Docker,
    memory_limit: i64,
    nano_cpus: i64,
}

impl DockerEngine {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(DockerEngine {
            docker,
            memory_limit: 256 * 1024 * 1024,
            nano_cpus: 500_000_000,
        })
    }

    fn image_name(language: Language) -> String {
        format!("marker-{}:latest", language)
    }

    /// The image's runner decodes SOURCE_CODE and TEST_INPUT
    fn command(language: Language) -> Vec<String> {
        let cmd: &[&str] = match language {
            Language::Python => &["python", "/runner.py"],
            Language::Java => &["java", "-cp", "/", "Runner"],
            Language::Rust => &["sh", "/runner.sh"],
        };
        cmd.iter().map(|s| s.to_string()).collect()
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.with_context(|| format!("Failed to pull image {}", image))?;
        }
        Ok(())
    }

    async fn run_container(
        &self,
        container_id: &str,
        timeout_ms: u64,
    ) -> Result<TestExecutionOutput> {
        let started = Instant::now();
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let collect = async {
            let options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });
            let mut logs = self.docker.logs(container_id, options);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        };

        let timed_out = tokio::time::timeout(Duration::from_millis(timeout_ms), collect)
            .await
            .is_err();
        if timed_out {
            let killed = self
                .docker
                .kill_container(container_id, None::<KillContainerOptions<String>>)
                .await;
            if let Err(e) = killed {
                warn!(container = %container_id, error = %e, "Failed to kill timed out container");
            }
        }

        let mut runtime_error = false;
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut wait = self.docker.wait_container(container_id, options);
        if let Some(status) = wait.next().await {
            // a non-zero exit surfaces as an Err from the wait stream
            runtime_error = !timed_out && !matches!(status, Ok(ref r) if r.status_code == 0);
        }

        Ok(TestExecutionOutput {
            test_id: 0,
            stdout,
            stderr,
            execution_time_ms: started.elapsed().as_millis() as u64,
            timed_out,
            runtime_error,
        })
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    async fn execute(
        &self,
        language: Language,
        source_code: &str,
        input: &str,
        timeout_ms: u64,
    ) -> Result<TestExecutionOutput> {
        let image = Self::image_name(language);
        self.ensure_image(&image).await?;

        let config = Config {
            image: Some(image),
            cmd: Some(Self::command(language)),
            env: Some(vec![
                format!("SOURCE_CODE={}", general_purpose::STANDARD.encode(source_code)),
                format!("TEST_INPUT={}", general_purpose::STANDARD.encode(input)),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(self.memory_limit),
                nano_cpus: Some(self.nano_cpus),
                ..Default::default()
            }),
            ..Default::default()
        };

        let name = format!("marker-{}", uuid::Uuid::new_v4());
        // armed before create so an aborted create cannot leak the container
        let _cleanup = ContainerGuard::new(name.clone(), {
            let docker = self.docker.clone();
            move |name| spawn_removal(docker, name)
        });

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        self.run_container(&name, timeout_ms).await
    }
}

/// Runs a cleanup for a named container when dropped
///
/// The job deadline aborts `execute` at whatever await it has reached, so
/// removal cannot live in straight-line code after the run.
struct ContainerGuard {
    name: String,
    cleanup: Option<Box<dyn FnOnce(String) + Send>>,
}

impl ContainerGuard {
    fn new(name: String, cleanup: impl FnOnce(String) + Send + 'static) -> Self {
        Self {
            name,
            cleanup: Some(Box::new(cleanup)),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(std::mem::take(&mut self.name));
        }
    }
}

/// Force-remove (and so kill) a container on a detached task
fn spawn_removal(docker: Docker, name: String) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(container = %name, "No runtime to remove container on");
        return;
    };
    runtime.spawn(async move {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        match docker.remove_container(&name, options).await {
            Ok(()) => debug!(container = %name, "Container removed"),
            Err(e) => warn!(container = %name, error = %e, "Failed to remove container"),
        }
    });
}
