//! Common test utilities shared across integration and E2E tests

pub mod agent_harness;
pub mod mock_executor;

pub use agent_harness::*;
pub use mock_executor::*;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Whether a program can be started from `PATH`.
pub fn program_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Interpreter for agent and process tests: `sh -c`.
pub fn shell() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string()]
}
