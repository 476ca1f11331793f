//! Sandbox service - main entry point

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::factory::ExecutorFactory;
use crate::registry::ExecutorRegistry;
use crate::types::{ExecutionRequest, ExecutionResult, ProviderHealth};
use crate::validator::{CodeValidator, LengthValidator};
use std::sync::Arc;

/// Validation gate in front of the executor factory
pub struct SandboxService {
    factory: Arc<ExecutorFactory>,
    validator: Arc<dyn CodeValidator>,
    default_timeout_secs: u64,
    max_timeout_secs: u64,
}

impl SandboxService {
    /// Build the factory from `config` with the length validator.
    pub fn from_config(config: &SandboxConfig, registry: &ExecutorRegistry) -> Result<Self> {
        let factory = ExecutorFactory::from_config(config, registry)?;
        Ok(Self::new(
            Arc::new(factory),
            LengthValidator::new(config.limits.max_code_length),
            config,
        ))
    }

    pub fn new(
        factory: Arc<ExecutorFactory>,
        validator: impl CodeValidator + 'static,
        config: &SandboxConfig,
    ) -> Self {
        Self {
            factory,
            validator: Arc::new(validator),
            default_timeout_secs: config.executor.default_timeout_secs,
            max_timeout_secs: config.executor.max_timeout_secs,
        }
    }

    pub fn factory(&self) -> &Arc<ExecutorFactory> {
        &self.factory
    }

    /// Validate and execute `code`.
    ///
    /// Rejected code and out-of-range timeouts are errors; anything that goes
    /// wrong after that is reported through the returned result.
    pub async fn execute(&self, code: &str, timeout_secs: Option<u64>) -> Result<ExecutionResult> {
        let timeout_secs = timeout_secs.unwrap_or(self.default_timeout_secs);
        if timeout_secs == 0 || timeout_secs > self.max_timeout_secs {
            return Err(SandboxError::Validation(format!(
                "timeout must be between 1 and {} seconds",
                self.max_timeout_secs
            )));
        }

        let verdict = self.validator.validate(code);
        if !verdict.passed {
            return Err(SandboxError::Validation(
                verdict
                    .reason
                    .unwrap_or_else(|| "code failed validation".to_string()),
            ));
        }

        let request = ExecutionRequest::new(code, timeout_secs);
        tracing::info!(
            execution_id = %request.execution_id,
            code_len = code.len(),
            timeout_secs,
            "Executing code"
        );
        Ok(self.factory.execute(&request).await)
    }

    pub async fn health(&self) -> Vec<ProviderHealth> {
        self.factory.health_report().await
    }

    pub async fn shutdown(&self) {
        self.factory.cleanup_all().await;
    }
}
