//! Firecracker microVM executor
//!
//! Every request boots its own microVM, talks to the guest agent over vsock
//! and tears the VM down before returning, whatever the outcome.

pub mod api;
pub mod channel;
pub mod lifecycle;
pub mod session;

pub use channel::{connect_vsock, handshake, AgentChannel, FileFetch};
pub use lifecycle::{VmInstance, VmState};
pub use session::{execute_in_guest, extract_outputs};

use super::Executor;
use crate::config::{FirecrackerSettings, SandboxConfig};
use crate::error::{Result, SandboxError};
use crate::limits::FileLimits;
use crate::registry::ExecutorRegistry;
use crate::types::{ExecutionOutput, ExecutionRequest};
use async_trait::async_trait;
use ember_common::GUEST_OUTPUT_DIR;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

const KVM_DEVICE: &str = "/dev/kvm";
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FirecrackerExecutor {
    settings: FirecrackerSettings,
    /// `None` disables file harvesting
    file_limits: Option<FileLimits>,
}

/// Register the `firecracker` provider.
pub fn register(registry: &mut ExecutorRegistry) {
    registry.register("firecracker", build);
}

fn build(config: &SandboxConfig) -> Result<Arc<dyn Executor>> {
    let settings = &config.firecracker;
    for (field, path) in [
        ("binary", &settings.binary),
        ("kernel_path", &settings.kernel_path),
        ("rootfs_path", &settings.rootfs_path),
        ("socket_dir", &settings.socket_dir),
    ] {
        if path.as_os_str().is_empty() {
            return Err(SandboxError::Configuration(format!(
                "firecracker.{} must be set",
                field
            )));
        }
    }

    let executor = FirecrackerExecutor::new(settings.clone());
    let executor: Arc<dyn Executor> = if config.storage.enabled {
        Arc::new(executor.with_file_harvest(config.limits.file_limits()))
    } else {
        Arc::new(executor)
    };
    Ok(executor)
}

impl FirecrackerExecutor {
    pub fn new(settings: FirecrackerSettings) -> Self {
        Self {
            settings,
            file_limits: None,
        }
    }

    pub fn with_file_harvest(mut self, limits: FileLimits) -> Self {
        self.file_limits = Some(limits);
        self
    }

    pub fn settings(&self) -> &FirecrackerSettings {
        &self.settings
    }

    async fn run(&self, vm: &mut VmInstance, request: &ExecutionRequest) -> Result<ExecutionOutput> {
        vm.configure(&self.settings).await?;
        vm.boot().await?;

        let stream = vm
            .connect_agent(
                self.settings.agent_port,
                self.settings.agent_ready_timeout,
                self.settings.poll_interval,
            )
            .await?;
        let mut channel = AgentChannel::new(stream);

        vm.transition(VmState::Executing)?;
        let mut output =
            execute_in_guest(&mut channel, request, self.settings.transport_margin).await?;

        if let (true, Some(limits)) = (output.success, &self.file_limits) {
            vm.transition(VmState::Extracting)?;
            let (artifacts, dropped) = extract_outputs(
                &mut channel,
                GUEST_OUTPUT_DIR,
                limits,
                self.settings.extract_timeout,
            )
            .await;
            output.artifacts = artifacts;
            output.dropped_files = dropped;
        }

        Ok(output)
    }

    async fn monitor_responds(&self) -> bool {
        let version = Command::new(&self.settings.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(
            tokio::time::timeout(VERSION_CHECK_TIMEOUT, version).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

#[async_trait]
impl Executor for FirecrackerExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput> {
        let started = Instant::now();
        let mut vm = VmInstance::create(&self.settings).await?;
        info!(
            execution_id = %request.execution_id,
            vm_id = vm.id(),
            "starting microVM"
        );

        let outcome = self.run(&mut vm, request).await;
        vm.terminate().await;

        outcome.map(|output| output.with_duration(started.elapsed()))
    }

    async fn health_check(&self) -> bool {
        let checks: [(&str, bool); 3] = [
            ("kvm device", Path::new(KVM_DEVICE).exists()),
            ("kernel image", self.settings.kernel_path.is_file()),
            ("root filesystem", self.settings.rootfs_path.is_file()),
        ];
        if let Some((what, _)) = checks.iter().find(|(_, ok)| !ok) {
            debug!(provider = "firecracker", missing = what, "health check failed");
            return false;
        }
        if tokio::fs::create_dir_all(&self.settings.socket_dir).await.is_err() {
            debug!(provider = "firecracker", dir = %self.settings.socket_dir.display(), "socket dir not writable");
            return false;
        }
        self.monitor_responds().await
    }

    /// Remove instance directories left by a crashed process. Only call
    /// this when no request is in flight.
    async fn cleanup(&self) {
        let removed = lifecycle::sweep_instances(&self.settings.socket_dir).await;
        if removed > 0 {
            info!(removed, "removed stale microVM instance directories");
        }
    }

    fn name(&self) -> &str {
        "firecracker"
    }
}
