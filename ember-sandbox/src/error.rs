//! Error taxonomy for the execution subsystem
//!
//! Only configuration errors are meant to escape to callers. Everything that
//! happens while serving a request is folded into a failed
//! [`ExecutionResult`](crate::ExecutionResult) by the factory.

use crate::types::DropReason;
use ember_common::ProtocolError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// Invalid or missing configuration; fatal at startup
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Provider name not present in the registry
    #[error("unknown executor provider '{name}'; available providers: {available}")]
    UnknownProvider { name: String, available: String },

    #[error("executor '{provider}' failed its health check")]
    ProviderUnhealthy { provider: String },

    /// Every candidate in the chain was unhealthy
    #[error("no healthy executor available (tried: {})", tried.join(", "))]
    ExecutorUnavailable { tried: Vec<String> },

    #[error("microVM {vm_id} failed to boot: {message}")]
    VmBoot { vm_id: String, message: String },

    #[error("guest agent not reachable within {}ms", timeout.as_millis())]
    AgentTimeout { timeout: Duration },

    #[error("guest protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("execution timed out after {timeout_secs}s")]
    ExecutionTimeout { timeout_secs: u64 },

    /// A produced file was dropped; surfaces as result metadata
    #[error("file '{name}' dropped: {reason}")]
    FileLimitExceeded { name: String, reason: DropReason },

    #[error("container engine error: {0}")]
    Container(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("code rejected: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether the error comes from configuration rather than from a request.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SandboxError::Configuration(_) | SandboxError::UnknownProvider { .. }
        )
    }
}

#[cfg(feature = "docker")]
impl From<bollard::errors::Error> for SandboxError {
    fn from(e: bollard::errors::Error) -> Self {
        SandboxError::Container(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
