//! Core types for sandbox execution

use crate::execution::ExecutionId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request to execute code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub execution_id: ExecutionId,

    /// The code to execute
    pub code: String,

    /// Wall-clock limit for the user's code, in seconds
    pub timeout_secs: u64,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            code: code.into(),
            timeout_secs,
        }
    }

    pub fn with_id(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = execution_id;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// File retrieved from a sandbox before it was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub content: Bytes,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// What an executor reports for one run, before files are published.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub duration: Duration,
    pub artifacts: Vec<Artifact>,
    pub dropped_files: Vec<DroppedFile>,
}

impl ExecutionOutput {
    /// The user's code overran its limit; no exit code is reported.
    pub fn timed_out(timeout_secs: u64) -> Self {
        Self {
            success: false,
            error: Some(format!("execution timed out after {}s", timeout_secs)),
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Why a produced file did not make it into the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    FileTooLarge,
    TotalSizeExceeded,
    FileCountExceeded,
    TransferFailed,
    /// Still pending when the extraction budget ran out
    ExtractionTimeout,
    StorageFailed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DropReason::FileTooLarge => "exceeds the per-file size limit",
            DropReason::TotalSizeExceeded => "exceeds the total size limit",
            DropReason::FileCountExceeded => "exceeds the file count limit",
            DropReason::TransferFailed => "could not be transferred from the sandbox",
            DropReason::ExtractionTimeout => "not transferred before the extraction deadline",
            DropReason::StorageFailed => "could not be stored",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedFile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub reason: DropReason,
}

impl DroppedFile {
    pub fn new(name: impl Into<String>, size: Option<u64>, reason: DropReason) -> Self {
        Self {
            name: name.into(),
            size,
            reason,
        }
    }
}

/// Outcome of one provider for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Unhealthy,
    Failed { error: String },
    Served,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub execution_id: Option<ExecutionId>,

    /// Provider that actually ran the code
    pub provider: Option<String>,

    /// Every provider considered, in order
    pub attempts: Vec<ProviderAttempt>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_files: Vec<DroppedFile>,
}

/// Unified result returned to callers, produced once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_seconds: f64,
    pub error: Option<String>,
    pub files: Vec<String>,
    pub metadata: ResultMetadata,
}

impl ExecutionResult {
    /// Failed result for a request no provider could serve.
    pub fn failure(error: impl Into<String>, duration: Duration, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_seconds: round_millis(duration),
            error: Some(error.into()),
            files: Vec::new(),
            metadata,
        }
    }

    pub fn from_output(
        output: ExecutionOutput,
        files: Vec<String>,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            success: output.success,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration_seconds: round_millis(output.duration),
            error: output.error,
            files,
            metadata,
        }
    }
}

fn round_millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Health of one configured provider at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub name: String,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}
