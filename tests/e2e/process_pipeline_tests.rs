//! Config to result through the builtin registry with the process backend

use crate::common::{setup_test_logging, shell};
use ember_sandbox::{AttemptOutcome, ExecutorRegistry, SandboxConfig, SandboxService};
use std::path::Path;
use tempfile::TempDir;

fn process_config(storage: &Path) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    config.executor.provider = "process".to_string();
    config.executor.fallback_providers = Vec::new();
    config.process.interpreter = shell();
    config.storage.enabled = true;
    config.storage.root = storage.to_path_buf();
    config
}

#[tokio::test]
async fn test_process_pipeline_publishes_files() {
    setup_test_logging();
    let storage = TempDir::new().unwrap();
    let config = process_config(storage.path());
    let service = SandboxService::from_config(&config, &ExecutorRegistry::builtin()).unwrap();

    let result = service
        .execute("echo hi; printf abc > result.txt; printf x > .cache", Some(5))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.metadata.provider.as_deref(), Some("process"));
    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].starts_with("file://"));
    assert!(result.files[0].ends_with("/result.txt"));

    let execution_id = result.metadata.execution_id.unwrap();
    let stored = storage
        .path()
        .join(execution_id.to_string())
        .join("result.txt");
    assert_eq!(std::fs::read(stored).unwrap(), b"abc");

    service.shutdown().await;
}

#[tokio::test]
async fn test_one_kilobyte_file_round_trip() {
    let storage = TempDir::new().unwrap();
    let service =
        SandboxService::from_config(&process_config(storage.path()), &ExecutorRegistry::builtin())
            .unwrap();

    let result = service
        .execute("head -c 1024 /dev/zero > blob.bin", Some(5))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_eq!(result.files.len(), 1);
    let path = result.files[0].strip_prefix("file://").unwrap();
    assert_eq!(std::fs::metadata(path).unwrap().len(), 1024);
    assert!(result.metadata.dropped_files.is_empty());
}

#[tokio::test]
async fn test_failed_run_publishes_nothing() {
    let storage = TempDir::new().unwrap();
    let service =
        SandboxService::from_config(&process_config(storage.path()), &ExecutorRegistry::builtin())
            .unwrap();

    let result = service
        .execute("printf abc > partial.txt; exit 1", Some(5))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.files.is_empty());
    assert_eq!(std::fs::read_dir(storage.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_timeout_is_a_result_not_a_fallback() {
    let storage = TempDir::new().unwrap();
    let service =
        SandboxService::from_config(&process_config(storage.path()), &ExecutorRegistry::builtin())
            .unwrap();

    let result = service.execute("sleep 30", Some(1)).await.unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));
    assert_eq!(result.metadata.attempts.len(), 1);
    assert_eq!(result.metadata.attempts[0].outcome, AttemptOutcome::Served);
}

#[tokio::test]
async fn test_missing_vm_images_fall_back_to_process() {
    let storage = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let mut config = process_config(storage.path());
    config.executor.provider = "firecracker".to_string();
    config.executor.fallback_providers = vec!["process".to_string()];
    config.firecracker.kernel_path = images.path().join("vmlinux");
    config.firecracker.rootfs_path = images.path().join("rootfs.ext4");
    config.firecracker.socket_dir = images.path().join("vms");

    let service = SandboxService::from_config(&config, &ExecutorRegistry::builtin()).unwrap();
    let result = service.execute("echo fallback", Some(5)).await.unwrap();

    assert!(result.success);
    assert_eq!(result.stdout, "fallback\n");
    assert_eq!(result.metadata.provider.as_deref(), Some("process"));
    assert_eq!(result.metadata.attempts[0].provider, "firecracker");
    assert_eq!(result.metadata.attempts[0].outcome, AttemptOutcome::Unhealthy);
    assert_eq!(result.metadata.attempts[1].outcome, AttemptOutcome::Served);
}
