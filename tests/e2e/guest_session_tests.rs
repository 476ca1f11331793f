//! Host session against a real guest agent behind a vsock-style socket

use crate::common::{setup_test_logging, shell, AgentHarness};
use assert_matches::assert_matches;
use ember_common::DEFAULT_AGENT_PORT;
use ember_sandbox::executor::firecracker::api::{ApiError, FirecrackerApi};
use ember_sandbox::executor::firecracker::{
    connect_vsock, execute_in_guest, extract_outputs, AgentChannel,
};
use ember_sandbox::{
    DropReason, ExecutionId, ExecutionRequest, FileExtractor, FileLimits, LocalDirStore,
    SandboxError,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixListener;

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(20);
const EXTRACT_BUDGET: Duration = Duration::from_secs(5);

/// A monitor socket that accepts connections and never writes a byte.
fn stalled_socket(path: &Path) -> tokio::task::JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    })
}

#[tokio::test]
async fn test_session_execute_and_extract() {
    setup_test_logging();
    let harness = AgentHarness::new(shell()).await;
    let sockets = tempfile::tempdir().unwrap();
    let vsock = sockets.path().join("vsock.sock");
    let shim = harness.serve_vsock_shim(&vsock, DEFAULT_AGENT_PORT);

    let stream = connect_vsock(&vsock, DEFAULT_AGENT_PORT, READY_TIMEOUT, POLL)
        .await
        .unwrap();
    let mut channel = AgentChannel::new(stream);

    let request = ExecutionRequest::new(
        "echo computing; printf 'x,y\\n1,2\\n' > result.csv; head -c 4096 /dev/zero > big.bin; : > empty.txt",
        5,
    );
    let output = execute_in_guest(&mut channel, &request, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(output.success, "{:?}", output);
    assert_eq!(output.stdout, "computing\n");

    let limits = FileLimits::new(1024, 8 * 1024, 10);
    let (artifacts, dropped) = extract_outputs(
        &mut channel,
        &harness.output_dir_str(),
        &limits,
        EXTRACT_BUDGET,
    )
    .await;

    let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["result.csv"]);
    assert_eq!(artifacts[0].content.as_ref(), b"x,y\n1,2\n");
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].name, "big.bin");
    assert_eq!(dropped[0].size, Some(4096));
    assert_eq!(dropped[0].reason, DropReason::FileTooLarge);

    let storage = tempfile::tempdir().unwrap();
    let extractor = FileExtractor::new(limits, Arc::new(LocalDirStore::new(storage.path())));
    let id = ExecutionId::new();
    let published = extractor.publish(&id, artifacts).await;
    assert_eq!(published.urls.len(), 1);
    assert!(published.urls[0].starts_with("file://"));
    assert!(published.urls[0].ends_with("/result.csv"));

    drop(channel);
    tokio::time::timeout(Duration::from_secs(5), shim)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_session_file_count_limit() {
    let harness = AgentHarness::new(shell()).await;
    let sockets = tempfile::tempdir().unwrap();
    let vsock = sockets.path().join("vsock.sock");
    let _shim = harness.serve_vsock_shim(&vsock, DEFAULT_AGENT_PORT);

    let stream = connect_vsock(&vsock, DEFAULT_AGENT_PORT, READY_TIMEOUT, POLL)
        .await
        .unwrap();
    let mut channel = AgentChannel::new(stream);

    let request = ExecutionRequest::new("for i in 1 2 3 4 5; do echo $i > f$i.txt; done", 5);
    let output = execute_in_guest(&mut channel, &request, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(output.success);

    let (artifacts, dropped) = extract_outputs(
        &mut channel,
        &harness.output_dir_str(),
        &FileLimits::new(1024, 1024, 3),
        EXTRACT_BUDGET,
    )
    .await;
    let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["f1.txt", "f2.txt", "f3.txt"]);
    assert_eq!(dropped.len(), 2);
    assert!(dropped
        .iter()
        .all(|file| file.reason == DropReason::FileCountExceeded));
}

#[tokio::test]
async fn test_session_timeout_reported_by_guest() {
    let harness = AgentHarness::new(shell()).await;
    let (host, _served) = harness.connect();
    let mut channel = AgentChannel::new(host);

    let output = execute_in_guest(
        &mut channel,
        &ExecutionRequest::new("sleep 30", 1),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    assert!(output.timed_out);
    assert!(!output.success);
    assert_eq!(output.exit_code, None);
}

#[tokio::test]
async fn test_agent_never_listening_times_out() {
    let sockets = tempfile::tempdir().unwrap();
    let err = connect_vsock(
        &sockets.path().join("vsock.sock"),
        DEFAULT_AGENT_PORT,
        Duration::from_millis(300),
        POLL,
    )
    .await
    .unwrap_err();
    assert_matches!(err, SandboxError::AgentTimeout { timeout } if timeout == Duration::from_millis(300));
}

#[tokio::test]
async fn test_stalled_vsock_handshake_times_out() {
    let sockets = tempfile::tempdir().unwrap();
    let vsock = sockets.path().join("vsock.sock");
    let monitor = stalled_socket(&vsock);

    let started = Instant::now();
    let err = connect_vsock(&vsock, DEFAULT_AGENT_PORT, Duration::from_millis(300), POLL)
        .await
        .unwrap_err();
    assert_matches!(err, SandboxError::AgentTimeout { timeout } if timeout == Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(3));
    monitor.abort();
}

#[tokio::test]
async fn test_stalled_api_socket_is_not_ready() {
    let sockets = tempfile::tempdir().unwrap();
    let api_socket = sockets.path().join("api.sock");
    let monitor = stalled_socket(&api_socket);

    let started = Instant::now();
    let err = FirecrackerApi::new(&api_socket)
        .wait_ready(Duration::from_millis(300), POLL)
        .await
        .unwrap_err();
    assert_matches!(err, ApiError::NotReady { .. });
    assert!(started.elapsed() < Duration::from_secs(3));
    monitor.abort();
}
