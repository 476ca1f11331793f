//! Scripted executor for factory and service tests

use async_trait::async_trait;
use ember_sandbox::{
    Artifact, ExecutionOutput, ExecutionRequest, Executor, Result, SandboxError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Exit 0 with this stdout
    Succeed(String),
    /// Exit 0 and leave these files behind
    Produce(Vec<Artifact>),
    /// Backend failure
    Fail(String),
    /// Never return
    Hang,
}

pub struct MockExecutor {
    name: String,
    healthy: bool,
    health_delay: Option<Duration>,
    behavior: MockBehavior,
    executions: AtomicUsize,
    health_checks: AtomicUsize,
    cleanups: AtomicUsize,
}

impl MockExecutor {
    pub fn new(name: &str, healthy: bool, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy,
            health_delay: None,
            behavior,
            executions: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        })
    }

    pub fn healthy(name: &str, stdout: &str) -> Arc<Self> {
        Self::new(name, true, MockBehavior::Succeed(stdout.to_string()))
    }

    pub fn unhealthy(name: &str) -> Arc<Self> {
        Self::new(name, false, MockBehavior::Succeed(String::new()))
    }

    /// Health check that takes `delay` before answering healthy.
    pub fn slow_health(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy: true,
            health_delay: Some(delay),
            behavior: MockBehavior::Succeed(String::new()),
            executions: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Succeed(stdout) => Ok(ExecutionOutput {
                success: true,
                stdout: stdout.clone(),
                exit_code: Some(0),
                duration: Duration::from_millis(5),
                ..Default::default()
            }),
            MockBehavior::Produce(artifacts) => Ok(ExecutionOutput {
                success: true,
                exit_code: Some(0),
                artifacts: artifacts.clone(),
                ..Default::default()
            }),
            MockBehavior::Fail(message) => Err(SandboxError::VmBoot {
                vm_id: format!("vm-{}", request.execution_id.simple()),
                message: message.clone(),
            }),
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.health_delay {
            tokio::time::sleep(delay).await;
        }
        self.healthy
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Erase the concrete type for `ExecutorFactory::from_executors`.
pub fn chain(executors: &[&Arc<MockExecutor>]) -> Vec<Arc<dyn Executor>> {
    executors
        .iter()
        .map(|executor| Arc::clone(executor) as Arc<dyn Executor>)
        .collect()
}
