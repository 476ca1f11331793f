//! Configuration for the execution subsystem
//!
//! Loaded from TOML; every section and field is optional and falls back to the
//! defaults below. A handful of deployment knobs can be overridden through
//! `EMBER_*` environment variables.

use crate::error::{Result, SandboxError};
use crate::limits::FileLimits;
use ember_common::{DEFAULT_AGENT_PORT, DEFAULT_MAX_OUTPUT_BYTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub process: ProcessSettings,
    #[serde(default)]
    pub docker: DockerSettings,
    #[serde(default = "DockerSettings::gvisor")]
    pub gvisor: DockerSettings,
    #[serde(default)]
    pub firecracker: FirecrackerSettings,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            limits: LimitSettings::default(),
            storage: StorageSettings::default(),
            process: ProcessSettings::default(),
            docker: DockerSettings::default(),
            gvisor: DockerSettings::gvisor(),
            firecracker: FirecrackerSettings::default(),
        }
    }
}

/// Provider selection and request bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Primary provider name
    pub provider: String,
    /// Tried in order when the primary is unhealthy or fails
    pub fallback_providers: Vec<String>,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    #[serde(with = "humantime_serde")]
    pub health_check_timeout: Duration,
    /// Slack on top of the request timeout for boot, transfer and teardown
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            provider: "docker".to_string(),
            fallback_providers: Vec::new(),
            default_timeout_secs: 10,
            max_timeout_secs: 30,
            health_check_timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_code_length: usize,
    /// Per-stream cap on returned stdout/stderr
    pub max_output_bytes: usize,
    pub max_file_size: u64,
    pub max_total_size: u64,
    pub max_file_count: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        let files = FileLimits::default();
        Self {
            max_code_length: 50_000,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_file_size: files.max_file_size,
            max_total_size: files.max_total_size,
            max_file_count: files.max_file_count,
        }
    }
}

impl LimitSettings {
    pub fn file_limits(&self) -> FileLimits {
        FileLimits::new(self.max_file_size, self.max_total_size, self.max_file_count)
    }
}

/// Where harvested files are published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// When false, no files are harvested at all
    pub enabled: bool,
    pub root: PathBuf,
    /// Prefix for returned URLs; `file://` URLs when unset
    pub public_base_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("/var/lib/ember/artifacts"),
            public_base_url: None,
        }
    }
}

/// Unisolated host execution, for development only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub interpreter: Vec<String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string(), "-c".to_string()],
        }
    }
}

/// Container backend; also used for gVisor with a different runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    pub image: String,
    pub interpreter: Vec<String>,
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub pids_limit: i64,
    /// OCI runtime, e.g. `runsc` for gVisor
    pub runtime: Option<String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            image: "python-sandbox:latest".to_string(),
            interpreter: vec!["python".to_string(), "-c".to_string()],
            memory_bytes: 128 * 1024 * 1024,
            memory_swap_bytes: 128 * 1024 * 1024,
            cpu_quota: 50_000,
            cpu_period: 100_000,
            pids_limit: 50,
            runtime: None,
        }
    }
}

impl DockerSettings {
    pub fn gvisor() -> Self {
        Self {
            runtime: Some("runsc".to_string()),
            ..Self::default()
        }
    }
}

/// microVM backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirecrackerSettings {
    pub binary: PathBuf,
    pub kernel_path: PathBuf,
    pub rootfs_path: PathBuf,
    /// Parent of every per-VM directory (API socket, vsock socket, disk copy)
    pub socket_dir: PathBuf,
    pub memory_mb: u32,
    pub vcpu_count: u32,
    pub boot_args: String,
    pub guest_cid: u32,
    pub agent_port: u32,
    /// Give every VM a private copy of the root filesystem
    pub copy_rootfs: bool,
    #[serde(with = "humantime_serde")]
    pub api_ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub agent_ready_timeout: Duration,
    /// Added to the request timeout while waiting for the execute reply
    #[serde(with = "humantime_serde")]
    pub transport_margin: Duration,
    /// Ceiling for listing and fetching output files after a run
    #[serde(with = "humantime_serde")]
    pub extract_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for FirecrackerSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("firecracker"),
            kernel_path: PathBuf::from("/var/firecracker/vmlinux"),
            rootfs_path: PathBuf::from("/var/firecracker/rootfs.ext4"),
            socket_dir: PathBuf::from("/tmp/firecracker"),
            memory_mb: 128,
            vcpu_count: 1,
            boot_args: "console=ttyS0 reboot=k panic=1 pci=off quiet".to_string(),
            guest_cid: 3,
            agent_port: DEFAULT_AGENT_PORT,
            copy_rootfs: true,
            api_ready_timeout: Duration::from_secs(5),
            agent_ready_timeout: Duration::from_secs(10),
            transport_margin: Duration::from_secs(2),
            extract_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SandboxConfig {
    /// Load from a TOML file (or defaults), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    SandboxError::Configuration(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SandboxError::Configuration(format!("failed to parse config: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SandboxError::Configuration(format!("failed to serialize config: {}", e)))
    }

    /// Apply `EMBER_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("EMBER_EXECUTOR_PROVIDER") {
            self.executor.provider = provider.trim().to_string();
        }
        if let Some(fallbacks) = lookup("EMBER_EXECUTOR_FALLBACK_PROVIDERS") {
            self.executor.fallback_providers = parse_provider_list(&fallbacks);
        }
        if let Some(enabled) = lookup("EMBER_STORAGE_ENABLED") {
            self.storage.enabled = matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(root) = lookup("EMBER_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(SandboxError::Configuration(message.to_string()));

        if self.executor.provider.trim().is_empty() {
            return invalid("executor.provider must not be empty");
        }
        if self.executor.default_timeout_secs == 0
            || self.executor.default_timeout_secs > self.executor.max_timeout_secs
        {
            return invalid("executor.default_timeout_secs must be within 1..=max_timeout_secs");
        }
        if self.limits.max_code_length == 0
            || self.limits.max_output_bytes == 0
            || self.limits.max_file_size == 0
            || self.limits.max_total_size == 0
        {
            return invalid("limits must be positive");
        }
        if self.process.interpreter.is_empty()
            || self.docker.interpreter.is_empty()
            || self.gvisor.interpreter.is_empty()
        {
            return invalid("interpreter command lines must not be empty");
        }
        if self.firecracker.memory_mb == 0 || self.firecracker.vcpu_count == 0 {
            return invalid("firecracker.memory_mb and firecracker.vcpu_count must be positive");
        }
        if self.firecracker.guest_cid < 3 {
            return invalid("firecracker.guest_cid must be 3 or greater");
        }
        Ok(())
    }
}

/// Parse a comma-separated provider list, skipping blanks.
pub fn parse_provider_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
