//! Container executor on the Docker engine API
//!
//! One fresh container per request: no network, all capabilities dropped,
//! memory/CPU/pids limits, and a host temp directory bind-mounted at
//! `/tmp/output` as the working directory. The same backend serves the
//! `gvisor` provider by selecting the `runsc` OCI runtime.

use super::Executor;
use crate::config::{DockerSettings, SandboxConfig};
use crate::error::{Result, SandboxError};
use crate::extractor::collect_output_dir;
use crate::limits::FileLimits;
use crate::registry::ExecutorRegistry;
use crate::types::{ExecutionOutput, ExecutionRequest};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, LogsOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use ember_common::{truncate_output, GUEST_OUTPUT_DIR};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const EXECUTION_LABEL: &str = "ember.execution";

pub struct DockerExecutor {
    name: String,
    docker: Docker,
    settings: DockerSettings,
    max_output_bytes: usize,
    /// `None` disables file harvesting
    file_limits: Option<FileLimits>,
}

/// Register the `docker` and `gvisor` providers.
pub fn register(registry: &mut ExecutorRegistry) {
    registry.register("docker", build_docker);
    registry.register("gvisor", build_gvisor);
}

fn build_docker(config: &SandboxConfig) -> Result<Arc<dyn Executor>> {
    let executor: Arc<dyn Executor> =
        Arc::new(DockerExecutor::connect("docker", config.docker.clone(), config)?);
    Ok(executor)
}

fn build_gvisor(config: &SandboxConfig) -> Result<Arc<dyn Executor>> {
    let mut settings = config.gvisor.clone();
    if settings.runtime.is_none() {
        settings.runtime = Some("runsc".to_string());
    }
    let executor: Arc<dyn Executor> = Arc::new(DockerExecutor::connect("gvisor", settings, config)?);
    Ok(executor)
}

impl DockerExecutor {
    /// Connect to the local engine; no request is sent until first use.
    pub fn connect(
        name: impl Into<String>,
        settings: DockerSettings,
        config: &SandboxConfig,
    ) -> Result<Self> {
        if settings.image.trim().is_empty() {
            return Err(SandboxError::Configuration(
                "container image must not be empty".to_string(),
            ));
        }
        let docker = Docker::connect_with_local_defaults()?;
        let file_limits = config
            .storage
            .enabled
            .then(|| config.limits.file_limits());
        Ok(Self {
            name: name.into(),
            docker,
            settings,
            max_output_bytes: config.limits.max_output_bytes,
            file_limits,
        })
    }

    fn container_body(&self, code: &str, output_dir: &Path) -> ContainerCreateBody {
        let mut cmd = self.settings.interpreter.clone();
        cmd.push(code.to_string());

        ContainerCreateBody {
            image: Some(self.settings.image.clone()),
            cmd: Some(cmd),
            working_dir: Some(GUEST_OUTPUT_DIR.to_string()),
            network_disabled: Some(true),
            labels: Some(HashMap::from([(
                EXECUTION_LABEL.to_string(),
                self.name.clone(),
            )])),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}:rw",
                    output_dir.display(),
                    GUEST_OUTPUT_DIR
                )]),
                memory: Some(self.settings.memory_bytes),
                memory_swap: Some(self.settings.memory_swap_bytes),
                cpu_quota: Some(self.settings.cpu_quota),
                cpu_period: Some(self.settings.cpu_period),
                pids_limit: Some(self.settings.pids_limit),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                runtime: self.settings.runtime.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn run(
        &self,
        container: &str,
        request: &ExecutionRequest,
        output_dir: &Path,
    ) -> Result<ExecutionOutput> {
        let options = CreateContainerOptionsBuilder::new().name(container).build();
        self.docker
            .create_container(Some(options), self.container_body(&request.code, output_dir))
            .await?;
        self.docker
            .start_container(container, None::<StartContainerOptions>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(container, None::<WaitContainerOptions>);
        let exit_code = match tokio::time::timeout(request.timeout(), wait.next()).await {
            Err(_) => {
                warn!(
                    execution_id = %request.execution_id,
                    container,
                    timeout_secs = request.timeout_secs,
                    "container execution timed out"
                );
                return Ok(ExecutionOutput::timed_out(request.timeout_secs));
            }
            Ok(Some(Ok(response))) => response.status_code,
            // Non-zero exits surface as a wait error carrying the code.
            Ok(Some(Err(BollardError::DockerContainerWaitError { code, .. }))) => code,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => {
                return Err(SandboxError::Container(
                    "container wait stream ended unexpectedly".to_string(),
                ))
            }
        };

        let (stdout, stderr) = self.collect_logs(container).await?;
        let success = exit_code == 0;
        let mut output = ExecutionOutput {
            success,
            stdout: truncate_output(&stdout, self.max_output_bytes),
            stderr: truncate_output(&stderr, self.max_output_bytes),
            exit_code: Some(exit_code as i32),
            ..Default::default()
        };

        if let (true, Some(limits)) = (success, &self.file_limits) {
            let (artifacts, dropped) = collect_output_dir(output_dir, limits).await;
            output.artifacts = artifacts;
            output.dropped_files = dropped;
        }

        Ok(output)
    }

    async fn collect_logs(&self, container: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut logs = self.docker.logs(
            container,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        // Keep one byte past the cap so truncation is still detected.
        let cap = self.max_output_bytes + 1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } if stdout.len() < cap => {
                    stdout.extend_from_slice(&message)
                }
                LogOutput::StdErr { message } if stderr.len() < cap => {
                    stderr.extend_from_slice(&message)
                }
                _ => {}
            }
        }
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput> {
        let started = Instant::now();
        let staging = tempfile::Builder::new().prefix("ember-docker-").tempdir()?;
        // The sandbox user is unprivileged and must be able to write here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o777))
                .await?;
        }

        let container = format!("ember-{}", request.execution_id.simple());
        let mut guard = ContainerGuard::new(self.docker.clone(), container.clone());

        let outcome = self.run(&container, request, staging.path()).await;

        guard.disarm();
        remove_container(&self.docker, &container).await;

        outcome.map(|output| output.with_duration(started.elapsed()))
    }

    async fn health_check(&self) -> bool {
        if let Err(e) = self.docker.ping().await {
            debug!(provider = %self.name, error = %e, "docker ping failed");
            return false;
        }
        if let Err(e) = self.docker.inspect_image(&self.settings.image).await {
            debug!(provider = %self.name, image = %self.settings.image, error = %e, "sandbox image unavailable");
            return false;
        }
        match &self.settings.runtime {
            None => true,
            Some(runtime) => match self.docker.info().await {
                Ok(info) => info
                    .runtimes
                    .map(|runtimes| runtimes.contains_key(runtime))
                    .unwrap_or(false),
                Err(e) => {
                    debug!(provider = %self.name, error = %e, "docker info failed");
                    false
                }
            },
        }
    }

    async fn cleanup(&self) {
        debug!(provider = %self.name, "containers are removed per request");
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn remove_container(docker: &Docker, container: &str) {
    let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
    match docker.remove_container(container, Some(options)).await {
        Ok(()) => debug!(container, "container removed"),
        Err(BollardError::DockerResponseServerError {
            status_code: 404, ..
        }) => {}
        Err(e) => warn!(container, error = %e, "failed to remove container"),
    }
}

/// Force-removes the container if the request future is dropped mid-run.
struct ContainerGuard {
    docker: Docker,
    container: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, container: String) -> Self {
        Self {
            docker,
            container,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let container = std::mem::take(&mut self.container);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                remove_container(&docker, &container).await;
            });
        }
    }
}
