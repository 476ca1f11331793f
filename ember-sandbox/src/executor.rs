//! Executor trait and backends

#[cfg(feature = "docker")]
pub mod docker;
#[cfg(feature = "firecracker")]
pub mod firecracker;
#[cfg(feature = "process")]
pub mod process;

use crate::types::{ExecutionOutput, ExecutionRequest};
use crate::Result;
use async_trait::async_trait;

#[cfg(feature = "docker")]
pub use docker::DockerExecutor;
#[cfg(feature = "firecracker")]
pub use firecracker::FirecrackerExecutor;
#[cfg(feature = "process")]
pub use process::ProcessExecutor;

/// Isolation backend that runs one request at a time per call.
///
/// Implementations are shared across concurrent requests and must not keep
/// per-request state on `self`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the request's code in a fresh sandbox and harvest its files.
    ///
    /// Every outcome of the user's code, a timeout included, is `Ok`. `Err`
    /// means the backend itself failed and another provider may be tried.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput>;

    /// Cheap readiness check with bounded side effects.
    async fn health_check(&self) -> bool;

    /// Release process-wide resources. Safe to call more than once.
    async fn cleanup(&self);

    /// Provider name as registered
    fn name(&self) -> &str;
}
