//! Provider selection with health checks and fallback
//!
//! The factory builds the primary executor and every fallback once, at
//! startup. Each request walks that chain in order: unhealthy candidates are
//! skipped, a healthy candidate that fails is recorded and the next untried
//! candidate gets the request. No candidate is tried twice for one request.

use crate::config::{ExecutorSettings, SandboxConfig};
use crate::error::{Result, SandboxError};
use crate::executor::Executor;
use crate::extractor::FileExtractor;
use crate::registry::ExecutorRegistry;
use crate::types::{
    AttemptOutcome, ExecutionOutput, ExecutionRequest, ExecutionResult, ProviderAttempt,
    ProviderHealth, ResultMetadata,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct ExecutorFactory {
    chain: Vec<Arc<dyn Executor>>,
    health_check_timeout: Duration,
    grace_period: Duration,
    extractor: FileExtractor,
    last_served: RwLock<Option<String>>,
}

impl ExecutorFactory {
    /// Build the configured chain through `registry`.
    ///
    /// Unknown provider names and constructor failures are configuration
    /// errors.
    pub fn from_config(config: &SandboxConfig, registry: &ExecutorRegistry) -> Result<Self> {
        let extractor =
            FileExtractor::from_settings(&config.storage, config.limits.file_limits());
        Self::with_extractor(config, registry, extractor)
    }

    pub fn with_extractor(
        config: &SandboxConfig,
        registry: &ExecutorRegistry,
        extractor: FileExtractor,
    ) -> Result<Self> {
        let primary = config.executor.provider.trim();
        if primary.is_empty() {
            return Err(SandboxError::Configuration(
                "executor.provider must not be empty".to_string(),
            ));
        }

        let mut chain = Vec::new();
        for name in provider_chain(primary, &config.executor.fallback_providers) {
            let executor = registry.create(&name, config)?;
            info!(provider = %name, "executor initialized");
            chain.push(executor);
        }

        Ok(Self::from_executors(chain, &config.executor, extractor))
    }

    /// Use already-constructed executors; the first one is the primary.
    pub fn from_executors(
        chain: Vec<Arc<dyn Executor>>,
        settings: &ExecutorSettings,
        extractor: FileExtractor,
    ) -> Self {
        Self {
            chain,
            health_check_timeout: settings.health_check_timeout,
            grace_period: settings.grace_period,
            extractor,
            last_served: RwLock::new(None),
        }
    }

    /// Configured primary provider
    pub fn provider(&self) -> Option<&str> {
        self.chain.first().map(|executor| executor.name())
    }

    /// Fallback providers in the order they are tried
    pub fn fallback_chain(&self) -> Vec<&str> {
        self.chain.iter().skip(1).map(|executor| executor.name()).collect()
    }

    /// Provider that served the most recent successful dispatch
    pub async fn last_served(&self) -> Option<String> {
        self.last_served.read().await.clone()
    }

    pub fn extractor(&self) -> &FileExtractor {
        &self.extractor
    }

    /// Check every configured provider now.
    pub async fn health_report(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::with_capacity(self.chain.len());
        for executor in &self.chain {
            let healthy = self.check_health(executor.as_ref()).await;
            report.push(ProviderHealth {
                name: executor.name().to_string(),
                healthy,
                checked_at: chrono::Utc::now(),
            });
        }
        report
    }

    /// Run `request` on the first healthy provider that completes it.
    ///
    /// Never fails: every problem is reported through the result.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let mut metadata = ResultMetadata {
            execution_id: Some(request.execution_id),
            ..Default::default()
        };

        if request.timeout_secs == 0 {
            return ExecutionResult::failure(
                "timeout must be a positive number of seconds",
                started.elapsed(),
                metadata,
            );
        }

        let mut last_failure = None;
        for executor in &self.chain {
            let provider = executor.name().to_string();

            if !self.check_health(executor.as_ref()).await {
                let error = SandboxError::ProviderUnhealthy {
                    provider: provider.clone(),
                };
                warn!(execution_id = %request.execution_id, error = %error, "skipping provider");
                metadata.attempts.push(ProviderAttempt {
                    provider,
                    outcome: AttemptOutcome::Unhealthy,
                });
                continue;
            }

            debug!(execution_id = %request.execution_id, provider = %provider, "dispatching");
            let deadline = request.timeout() + self.grace_period;
            let outcome = match tokio::time::timeout(deadline, executor.execute(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SandboxError::ExecutionTimeout {
                    timeout_secs: request.timeout_secs,
                }),
            };

            match outcome {
                Ok(output) => {
                    info!(
                        execution_id = %request.execution_id,
                        provider = %provider,
                        success = output.success,
                        "execution finished"
                    );
                    metadata.attempts.push(ProviderAttempt {
                        provider: provider.clone(),
                        outcome: AttemptOutcome::Served,
                    });
                    metadata.provider = Some(provider.clone());
                    *self.last_served.write().await = Some(provider);
                    return self.finish(request, output, metadata).await;
                }
                Err(e) => {
                    warn!(
                        execution_id = %request.execution_id,
                        provider = %provider,
                        error = %e,
                        "provider failed, trying next"
                    );
                    metadata.attempts.push(ProviderAttempt {
                        provider,
                        outcome: AttemptOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                    last_failure = Some(e);
                }
            }
        }

        let error = last_failure.unwrap_or_else(|| SandboxError::ExecutorUnavailable {
            tried: self.chain.iter().map(|e| e.name().to_string()).collect(),
        });
        warn!(execution_id = %request.execution_id, error = %error, "no provider served the request");
        ExecutionResult::failure(error.to_string(), started.elapsed(), metadata)
    }

    /// Release every executor's process-wide resources.
    pub async fn cleanup_all(&self) {
        for executor in &self.chain {
            info!(provider = executor.name(), "cleaning up executor");
            executor.cleanup().await;
        }
    }

    async fn check_health(&self, executor: &dyn Executor) -> bool {
        tokio::time::timeout(self.health_check_timeout, executor.health_check())
            .await
            .unwrap_or(false)
    }

    async fn finish(
        &self,
        request: &ExecutionRequest,
        mut output: ExecutionOutput,
        mut metadata: ResultMetadata,
    ) -> ExecutionResult {
        let artifacts = std::mem::take(&mut output.artifacts);
        metadata.dropped_files = std::mem::take(&mut output.dropped_files);

        let published = self.extractor.publish(&request.execution_id, artifacts).await;
        metadata.dropped_files.extend(published.dropped);

        ExecutionResult::from_output(output, published.urls, metadata)
    }
}

/// Primary followed by the fallbacks, without blanks or repeats.
pub fn provider_chain(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut chain = vec![primary.to_string()];
    for name in fallbacks.iter().map(|name| name.trim()) {
        if !name.is_empty() && !chain.iter().any(|seen| seen == name) {
            chain.push(name.to_string());
        }
    }
    chain
}
