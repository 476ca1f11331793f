//! Validation gate in front of the factory

use crate::common::{chain, MockExecutor};
use assert_matches::assert_matches;
use ember_sandbox::{
    CodeValidator, ExecutorFactory, ExecutorRegistry, FileExtractor, FileLimits, LengthValidator,
    SandboxConfig, SandboxError, SandboxService, Validation,
};
use std::sync::Arc;

struct DenyImports;

impl CodeValidator for DenyImports {
    fn validate(&self, code: &str) -> Validation {
        if code.contains("import os") {
            Validation::fail("module 'os' is not allowed")
        } else {
            Validation::pass()
        }
    }
}

fn service_with(
    executor: &Arc<MockExecutor>,
    validator: impl CodeValidator + 'static,
) -> SandboxService {
    let config = SandboxConfig::default();
    let factory = ExecutorFactory::from_executors(
        chain(&[executor]),
        &config.executor,
        FileExtractor::disabled(FileLimits::default()),
    );
    SandboxService::new(Arc::new(factory), validator, &config)
}

#[tokio::test]
async fn test_valid_code_is_executed() {
    let executor = MockExecutor::healthy("process", "hi\n");
    let service = service_with(&executor, LengthValidator::new(100));

    let result = service.execute("print('hi')", None).await.unwrap();
    assert!(result.success);
    assert_eq!(result.stdout, "hi\n");
    assert!(result.metadata.execution_id.is_some());
    assert_eq!(executor.executions(), 1);
}

#[tokio::test]
async fn test_rejected_code_never_reaches_executor() {
    let executor = MockExecutor::healthy("process", "");
    let service = service_with(&executor, DenyImports);

    let err = service.execute("import os", None).await.unwrap_err();
    assert_matches!(err, SandboxError::Validation(ref reason) if reason.contains("'os'"));
    assert_eq!(executor.executions(), 0);
    assert_eq!(executor.health_checks(), 0);
}

#[tokio::test]
async fn test_oversized_code_rejected() {
    let executor = MockExecutor::healthy("process", "");
    let service = service_with(&executor, LengthValidator::new(8));

    let err = service.execute("print('too long')", None).await.unwrap_err();
    assert_matches!(err, SandboxError::Validation(_));
}

#[tokio::test]
async fn test_timeout_bounds() {
    let executor = MockExecutor::healthy("process", "");
    let service = service_with(&executor, LengthValidator::new(100));
    let max = SandboxConfig::default().executor.max_timeout_secs;

    assert_matches!(
        service.execute("1", Some(0)).await,
        Err(SandboxError::Validation(_))
    );
    assert_matches!(
        service.execute("1", Some(max + 1)).await,
        Err(SandboxError::Validation(_))
    );
    assert!(service.execute("1", Some(max)).await.unwrap().success);
    assert_eq!(executor.executions(), 1);
}

#[tokio::test]
async fn test_unknown_provider_fails_at_startup() {
    let mut config = SandboxConfig::default();
    config.executor.provider = "hyperdrive".to_string();

    let err = SandboxService::from_config(&config, &ExecutorRegistry::builtin())
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert_matches!(err, SandboxError::UnknownProvider { ref name, .. } if name == "hyperdrive");
}
