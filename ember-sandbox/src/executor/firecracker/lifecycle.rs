//! MicroVM lifecycle: per-request monitor process, paths and teardown
//!
//! A [`VmInstance`] owns everything one request creates on the host: the
//! instance directory with both sockets and the optional rootfs copy, and the
//! monitor process. [`VmInstance::terminate`] releases all of it; if the
//! owning future is dropped first, `Drop` kills the process and removes the
//! directory without blocking.

use super::api::{BootSource, Drive, FirecrackerApi, InstanceAction, MachineConfig, VsockDevice};
use crate::config::FirecrackerSettings;
use crate::error::{Result, SandboxError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const API_SOCKET: &str = "api.sock";
pub const VSOCK_SOCKET: &str = "vsock.sock";
pub const ROOTFS_COPY: &str = "rootfs.ext4";
pub const INSTANCE_PREFIX: &str = "vm-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created,
    Configured,
    Booted,
    AgentReady,
    Executing,
    Extracting,
    Terminated,
    Failed,
}

impl VmState {
    /// Whether `self -> next` is a legal step.
    pub fn can_transition(self, next: VmState) -> bool {
        use VmState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Created, Configured)
            | (Configured, Booted)
            | (Booted, AgentReady)
            | (AgentReady, Executing)
            | (Executing, Extracting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmState::Created => "created",
            VmState::Configured => "configured",
            VmState::Booted => "booted",
            VmState::AgentReady => "agent_ready",
            VmState::Executing => "executing",
            VmState::Extracting => "extracting",
            VmState::Terminated => "terminated",
            VmState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct VmInstance {
    id: String,
    dir: PathBuf,
    api_socket: PathBuf,
    vsock_socket: PathBuf,
    rootfs: PathBuf,
    process: Option<Child>,
    state: VmState,
    api_timeout: Duration,
    shutdown_timeout: Duration,
}

impl VmInstance {
    /// Allocate an id and the instance directory under `socket_dir`.
    pub async fn create(settings: &FirecrackerSettings) -> Result<Self> {
        let id = format!("{}{}", INSTANCE_PREFIX, Uuid::new_v4().simple());
        let dir = settings.socket_dir.join(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut instance = Self {
            api_socket: dir.join(API_SOCKET),
            vsock_socket: dir.join(VSOCK_SOCKET),
            rootfs: settings.rootfs_path.clone(),
            id,
            dir,
            process: None,
            state: VmState::Created,
            api_timeout: settings.api_ready_timeout,
            shutdown_timeout: settings.shutdown_timeout,
        };

        if settings.copy_rootfs {
            let copy = instance.dir.join(ROOTFS_COPY);
            if let Err(e) = tokio::fs::copy(&settings.rootfs_path, &copy).await {
                let message = format!(
                    "cannot copy rootfs {}: {}",
                    settings.rootfs_path.display(),
                    e
                );
                return Err(instance.fail(message).await);
            }
            instance.rootfs = copy;
        }

        debug!(vm_id = %instance.id, dir = %instance.dir.display(), "instance created");
        Ok(instance)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn api_socket(&self) -> &Path {
        &self.api_socket
    }

    pub fn vsock_socket(&self) -> &Path {
        &self.vsock_socket
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn transition(&mut self, next: VmState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(SandboxError::VmBoot {
                vm_id: self.id.clone(),
                message: format!("illegal state transition {} -> {}", self.state, next),
            });
        }
        debug!(vm_id = %self.id, from = %self.state, to = %next, "vm state");
        self.state = next;
        Ok(())
    }

    /// Created -> Configured: spawn the monitor and configure the machine.
    pub async fn configure(&mut self, settings: &FirecrackerSettings) -> Result<()> {
        if let Err(e) = self.spawn_monitor(&settings.binary) {
            let message = format!("cannot spawn {}: {}", settings.binary.display(), e);
            return Err(self.fail(message).await);
        }

        let api = FirecrackerApi::new(&self.api_socket).with_request_timeout(self.api_timeout);
        if let Err(e) = self.wait_api(&api, settings).await {
            return Err(self.fail(e).await);
        }

        let configured = async {
            api.put(
                "/boot-source",
                &BootSource {
                    kernel_image_path: &settings.kernel_path,
                    boot_args: &settings.boot_args,
                },
                "boot_source",
            )
            .await?;
            api.put(
                "/drives/rootfs",
                &Drive {
                    drive_id: "rootfs",
                    path_on_host: &self.rootfs,
                    is_root_device: true,
                    is_read_only: false,
                },
                "drive_rootfs",
            )
            .await?;
            api.put(
                "/machine-config",
                &MachineConfig {
                    vcpu_count: settings.vcpu_count,
                    mem_size_mib: settings.memory_mb,
                },
                "machine_config",
            )
            .await?;
            api.put(
                "/vsock",
                &VsockDevice {
                    guest_cid: settings.guest_cid,
                    uds_path: &self.vsock_socket,
                },
                "vsock",
            )
            .await
        }
        .await;

        if let Err(e) = configured {
            return Err(self.fail(e.to_string()).await);
        }
        self.transition(VmState::Configured)
    }

    /// Configured -> Booted
    pub async fn boot(&mut self) -> Result<()> {
        let api = FirecrackerApi::new(&self.api_socket).with_request_timeout(self.api_timeout);
        if let Err(e) = api
            .put("/actions", &InstanceAction::start(), "instance_start")
            .await
        {
            return Err(self.fail(e.to_string()).await);
        }
        info!(vm_id = %self.id, "microVM booted");
        self.transition(VmState::Booted)
    }

    /// Booted -> AgentReady: open the agent connection through the vsock
    /// socket. The returned stream is the one used for the whole session.
    pub async fn connect_agent(
        &mut self,
        port: u32,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<UnixStream> {
        match super::channel::connect_vsock(&self.vsock_socket, port, timeout, poll_interval).await
        {
            Ok(stream) => {
                self.transition(VmState::AgentReady)?;
                Ok(stream)
            }
            Err(e) => {
                warn!(vm_id = %self.id, error = %e, "guest agent not reachable");
                self.state = VmState::Failed;
                Err(e)
            }
        }
    }

    /// Kill the monitor and remove the instance directory. Idempotent.
    pub async fn terminate(&mut self) {
        if self.state == VmState::Terminated {
            return;
        }

        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.start_kill() {
                debug!(vm_id = %self.id, error = %e, "monitor already gone");
            }
            match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => debug!(vm_id = %self.id, %status, "monitor exited"),
                Ok(Err(e)) => warn!(vm_id = %self.id, error = %e, "failed to reap monitor"),
                Err(_) => warn!(
                    vm_id = %self.id,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "monitor did not exit in time"
                ),
            }
        }

        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(vm_id = %self.id, dir = %self.dir.display(), error = %e, "failed to remove instance dir"),
        }

        self.state = VmState::Terminated;
        debug!(vm_id = %self.id, "instance terminated");
    }

    fn spawn_monitor(&mut self, binary: &Path) -> std::io::Result<()> {
        let mut child = Command::new(binary)
            .arg("--api-sock")
            .arg(&self.api_socket)
            .arg("--id")
            .arg(&self.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            pump_lines(self.id.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(self.id.clone(), "stderr", stderr);
        }
        self.process = Some(child);
        Ok(())
    }

    async fn wait_api(
        &mut self,
        api: &FirecrackerApi,
        settings: &FirecrackerSettings,
    ) -> std::result::Result<(), String> {
        let started = Instant::now();
        let ready = api.wait_ready(settings.api_ready_timeout, settings.poll_interval);
        tokio::pin!(ready);
        loop {
            tokio::select! {
                result = &mut ready => {
                    return result.map_err(|e| e.to_string()).map(|()| {
                        debug!(vm_id = %self.id, elapsed_ms = started.elapsed().as_millis() as u64, "API ready");
                    });
                }
                _ = tokio::time::sleep(settings.poll_interval) => {
                    if let Some(status) = self.exited() {
                        return Err(format!("monitor exited during startup ({})", status));
                    }
                }
            }
        }
    }

    fn exited(&mut self) -> Option<std::process::ExitStatus> {
        self.process
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }

    /// Tear down, mark failed and build the boot error.
    async fn fail(&mut self, message: impl Into<String>) -> SandboxError {
        let message = message.into();
        warn!(vm_id = %self.id, state = %self.state, error = %message, "microVM setup failed");
        self.state = VmState::Failed;
        let error = SandboxError::VmBoot {
            vm_id: self.id.clone(),
            message,
        };
        self.terminate().await;
        error
    }
}

impl Drop for VmInstance {
    fn drop(&mut self) {
        if self.state == VmState::Terminated {
            return;
        }
        warn!(vm_id = %self.id, state = %self.state, "instance dropped before termination");
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(vm_id = %self.id, error = %e, "failed to remove instance dir");
            }
        }
    }
}

fn pump_lines<R>(vm_id: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(vm_id = %vm_id, stream, "{}", line);
        }
    });
}

/// Remove instance directories left behind by a previous process.
pub async fn sweep_instances(socket_dir: &Path) -> usize {
    let mut removed = 0;
    let Ok(mut listing) = tokio::fs::read_dir(socket_dir).await else {
        return removed;
    };
    while let Ok(Some(entry)) = listing.next_entry().await {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(INSTANCE_PREFIX) {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %entry.path().display(), error = %e, "failed to remove stale instance"),
        }
    }
    removed
}
