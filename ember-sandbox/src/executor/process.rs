//! Process-based executor
//!
//! Runs the interpreter directly on the host inside a throwaway working
//! directory. There is no isolation at all; this backend exists for local
//! development and as a last-resort fallback in trusted environments.

use super::Executor;
use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::extractor::collect_output_dir;
use crate::limits::FileLimits;
use crate::registry::ExecutorRegistry;
use crate::types::{ExecutionOutput, ExecutionRequest};
use async_trait::async_trait;
use ember_common::{truncate_output, wait_capped, DEFAULT_MAX_OUTPUT_BYTES};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProcessExecutor {
    interpreter: Vec<String>,
    max_output_bytes: usize,
    /// `None` disables file harvesting
    file_limits: Option<FileLimits>,
}

impl ProcessExecutor {
    pub fn new(interpreter: Vec<String>) -> Self {
        Self {
            interpreter,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            file_limits: None,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        let executor = Self::new(config.process.interpreter.clone())
            .with_max_output_bytes(config.limits.max_output_bytes);
        if config.storage.enabled {
            executor.with_file_harvest(config.limits.file_limits())
        } else {
            executor
        }
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_file_harvest(mut self, limits: FileLimits) -> Self {
        self.file_limits = Some(limits);
        self
    }

    fn command(&self, code: &str) -> Result<Command> {
        let (program, args) = self.interpreter.split_first().ok_or_else(|| {
            SandboxError::Configuration("process interpreter is empty".to_string())
        })?;
        let mut command = Command::new(program);
        command
            .args(args)
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(vec!["python3".to_string(), "-c".to_string()])
    }
}

/// Register the `process` provider.
pub fn register(registry: &mut ExecutorRegistry) {
    registry.register("process", build);
}

fn build(config: &SandboxConfig) -> Result<Arc<dyn Executor>> {
    if config.process.interpreter.is_empty() {
        return Err(SandboxError::Configuration(
            "process.interpreter must not be empty".to_string(),
        ));
    }
    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::from_config(config));
    Ok(executor)
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput> {
        let started = Instant::now();
        let workdir = tempfile::Builder::new()
            .prefix("ember-process-")
            .tempdir()?;

        let mut child = self
            .command(&request.code)?
            .current_dir(workdir.path())
            .spawn()?;

        // On timeout the child is dropped, which kills it.
        let waited = tokio::time::timeout(
            request.timeout(),
            wait_capped(&mut child, self.max_output_bytes),
        )
        .await;
        let output = match waited {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(
                    execution_id = %request.execution_id,
                    timeout_secs = request.timeout_secs,
                    "process execution timed out"
                );
                return Ok(ExecutionOutput::timed_out(request.timeout_secs)
                    .with_duration(started.elapsed()));
            }
        };

        let exit_code = output.status.code();
        let mut result = ExecutionOutput {
            success: output.status.success(),
            stdout: truncate_output(&output.stdout, self.max_output_bytes),
            stderr: truncate_output(&output.stderr, self.max_output_bytes),
            exit_code,
            error: exit_code
                .is_none()
                .then(|| "process terminated by signal".to_string()),
            ..Default::default()
        };

        if let (true, Some(limits)) = (result.success, &self.file_limits) {
            let (artifacts, dropped) = collect_output_dir(workdir.path(), limits).await;
            result.artifacts = artifacts;
            result.dropped_files = dropped;
        }

        Ok(result.with_duration(started.elapsed()))
    }

    async fn health_check(&self) -> bool {
        let Ok(mut command) = self.command("") else {
            return false;
        };
        let Ok(child) = command.spawn() else {
            return false;
        };
        matches!(
            tokio::time::timeout(HEALTH_CHECK_TIMEOUT, child.wait_with_output()).await,
            Ok(Ok(output)) if output.status.success()
        )
    }

    async fn cleanup(&self) {
        tracing::debug!("process executor has nothing to clean up");
    }

    fn name(&self) -> &str {
        "process"
    }
}
