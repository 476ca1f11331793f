//! Provider selection, fallback and result assembly

use crate::common::{chain, setup_test_logging, MockBehavior, MockExecutor};
use ember_sandbox::{
    Artifact, AttemptOutcome, DropReason, ExecutionRequest, ExecutorFactory, ExecutorSettings,
    FileExtractor, FileLimits, LocalDirStore, ProviderAttempt,
};
use std::sync::Arc;
use std::time::Duration;

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        health_check_timeout: Duration::from_millis(500),
        grace_period: Duration::from_secs(1),
        ..Default::default()
    }
}

fn attempt(provider: &str, outcome: AttemptOutcome) -> ProviderAttempt {
    ProviderAttempt {
        provider: provider.to_string(),
        outcome,
    }
}

#[tokio::test]
async fn test_unhealthy_primary_falls_back() {
    setup_test_logging();
    let primary = MockExecutor::unhealthy("firecracker");
    let fallback = MockExecutor::healthy("docker", "4\n");
    let factory = ExecutorFactory::from_executors(
        chain(&[&primary, &fallback]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let result = factory.execute(&ExecutionRequest::new("print(2+2)", 5)).await;

    assert!(result.success);
    assert_eq!(result.stdout, "4\n");
    assert_eq!(result.metadata.provider.as_deref(), Some("docker"));
    assert_eq!(
        result.metadata.attempts,
        vec![
            attempt("firecracker", AttemptOutcome::Unhealthy),
            attempt("docker", AttemptOutcome::Served),
        ]
    );
    assert_eq!(primary.executions(), 0);
    assert_eq!(fallback.executions(), 1);
    assert_eq!(factory.last_served().await.as_deref(), Some("docker"));
}

#[tokio::test]
async fn test_all_unhealthy_reports_unavailable() {
    let primary = MockExecutor::unhealthy("firecracker");
    let fallback = MockExecutor::unhealthy("docker");
    let factory = ExecutorFactory::from_executors(
        chain(&[&primary, &fallback]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let result = factory.execute(&ExecutionRequest::new("print(1)", 5)).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    let error = result.error.unwrap();
    assert!(error.contains("no healthy executor"), "{}", error);
    assert!(error.contains("firecracker, docker"), "{}", error);
    assert!(result.metadata.provider.is_none());
    assert_eq!(primary.executions() + fallback.executions(), 0);
    assert_eq!(primary.health_checks(), 1);
    assert_eq!(fallback.health_checks(), 1);
    assert_eq!(factory.last_served().await, None);
}

#[tokio::test]
async fn test_backend_failure_falls_back_once() {
    let primary = MockExecutor::new(
        "firecracker",
        true,
        MockBehavior::Fail("kernel panic".to_string()),
    );
    let fallback = MockExecutor::healthy("process", "ok\n");
    let factory = ExecutorFactory::from_executors(
        chain(&[&primary, &fallback]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let result = factory.execute(&ExecutionRequest::new("print('ok')", 5)).await;

    assert!(result.success);
    assert_eq!(result.metadata.provider.as_deref(), Some("process"));
    assert_eq!(primary.executions(), 1);
    assert_matches::assert_matches!(
        &result.metadata.attempts[0].outcome,
        AttemptOutcome::Failed { error } if error.contains("kernel panic")
    );
}

#[tokio::test]
async fn test_last_failure_is_reported() {
    let only = MockExecutor::new("docker", true, MockBehavior::Fail("image pull".to_string()));
    let factory = ExecutorFactory::from_executors(
        chain(&[&only]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let result = factory.execute(&ExecutionRequest::new("1", 5)).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("image pull"));
    assert_eq!(only.executions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_executor_is_bounded() {
    let hung = MockExecutor::new("firecracker", true, MockBehavior::Hang);
    let fallback = MockExecutor::healthy("process", "late\n");
    let factory = ExecutorFactory::from_executors(
        chain(&[&hung, &fallback]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let started = tokio::time::Instant::now();
    let result = factory.execute(&ExecutionRequest::new("loop", 2)).await;

    // timeout + grace period, then the fallback serves
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(result.success);
    assert_eq!(result.metadata.provider.as_deref(), Some("process"));
    assert_matches::assert_matches!(
        &result.metadata.attempts[0].outcome,
        AttemptOutcome::Failed { error } if error.contains("timed out after 2s")
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_health_check_counts_as_unhealthy() {
    let slow = MockExecutor::slow_health("firecracker", Duration::from_secs(30));
    let fallback = MockExecutor::healthy("process", "ok\n");
    let factory = ExecutorFactory::from_executors(
        chain(&[&slow, &fallback]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let result = factory.execute(&ExecutionRequest::new("1", 5)).await;

    assert_eq!(result.metadata.provider.as_deref(), Some("process"));
    assert_eq!(slow.executions(), 0);
    assert_eq!(result.metadata.attempts[0].outcome, AttemptOutcome::Unhealthy);
}

#[tokio::test]
async fn test_zero_timeout_is_rejected_without_dispatch() {
    let only = MockExecutor::healthy("process", "");
    let factory = ExecutorFactory::from_executors(
        chain(&[&only]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    let result = factory.execute(&ExecutionRequest::new("1", 0)).await;

    assert!(!result.success);
    assert_eq!(only.health_checks(), 0);
    assert_eq!(only.executions(), 0);
}

#[tokio::test]
async fn test_files_published_within_limits() {
    let storage = tempfile::tempdir().unwrap();
    let producer = MockExecutor::new(
        "docker",
        true,
        MockBehavior::Produce(vec![
            Artifact::new("plot.png", vec![1u8; 512]),
            Artifact::new("dump.bin", vec![0u8; 4096]),
            Artifact::new("empty.txt", Vec::new()),
        ]),
    );
    let extractor = FileExtractor::new(
        FileLimits::new(1024, 10 * 1024, 10),
        Arc::new(LocalDirStore::new(storage.path()).with_public_base_url("https://files.test/")),
    );
    let factory = ExecutorFactory::from_executors(chain(&[&producer]), &settings(), extractor);

    let request = ExecutionRequest::new("make_plot()", 5);
    let result = factory.execute(&request).await;

    assert!(result.success);
    assert_eq!(
        result.files,
        vec![format!("https://files.test/{}/plot.png", request.execution_id)]
    );
    assert_eq!(result.metadata.dropped_files.len(), 1);
    assert_eq!(result.metadata.dropped_files[0].name, "dump.bin");
    assert_eq!(
        result.metadata.dropped_files[0].reason,
        DropReason::FileTooLarge
    );
    assert!(storage
        .path()
        .join(request.execution_id.to_string())
        .join("plot.png")
        .is_file());
}

#[tokio::test]
async fn test_health_report_and_cleanup() {
    let primary = MockExecutor::unhealthy("firecracker");
    let fallback = MockExecutor::healthy("docker", "");
    let factory = ExecutorFactory::from_executors(
        chain(&[&primary, &fallback]),
        &settings(),
        FileExtractor::disabled(FileLimits::default()),
    );

    assert_eq!(factory.provider(), Some("firecracker"));
    assert_eq!(factory.fallback_chain(), vec!["docker"]);

    let report = factory.health_report().await;
    let summary: Vec<_> = report
        .iter()
        .map(|health| (health.name.as_str(), health.healthy))
        .collect();
    assert_eq!(summary, vec![("firecracker", false), ("docker", true)]);

    factory.cleanup_all().await;
    factory.cleanup_all().await;
    assert_eq!(primary.cleanups(), 2);
    assert_eq!(fallback.cleanups(), 2);
}
