//! Request/response exchange with a booted guest

use super::channel::{AgentChannel, FileFetch};
use crate::error::Result;
use crate::limits::{is_ignored, FileLimits};
use crate::types::{Artifact, DropReason, DroppedFile, ExecutionOutput, ExecutionRequest};
use ember_common::{ExecuteResponse, ListFilesReply};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Send `execute` and wait for the reply.
///
/// The agent enforces the timeout itself; the host waits `margin` longer
/// before reporting the run as timed out.
pub async fn execute_in_guest<S>(
    channel: &mut AgentChannel<S>,
    request: &ExecutionRequest,
    margin: Duration,
) -> Result<ExecutionOutput>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let deadline = request.timeout() + margin;
    match tokio::time::timeout(deadline, channel.execute(&request.code, request.timeout_secs)).await
    {
        Ok(response) => Ok(into_output(response?)),
        Err(_) => {
            warn!(
                execution_id = %request.execution_id,
                deadline_ms = deadline.as_millis() as u64,
                "guest did not answer before the deadline"
            );
            Ok(ExecutionOutput::timed_out(request.timeout_secs))
        }
    }
}

fn into_output(response: ExecuteResponse) -> ExecutionOutput {
    ExecutionOutput {
        success: response.success,
        stdout: response.stdout,
        stderr: response.stderr,
        exit_code: response.exit_code,
        error: response.error,
        timed_out: response.timed_out,
        ..Default::default()
    }
}

/// Pull the files in the guest's `output_dir` out within `limits`.
///
/// A transport failure ends extraction: the file in flight is recorded as
/// `transfer_failed` and whatever was already retrieved is kept. The whole
/// exchange is bounded by `budget`; files not retrieved by then are dropped
/// as `extraction_timeout`.
pub async fn extract_outputs<S>(
    channel: &mut AgentChannel<S>,
    output_dir: &str,
    limits: &FileLimits,
    budget: Duration,
) -> (Vec<Artifact>, Vec<DroppedFile>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let deadline = Instant::now() + budget;
    let listing = match timeout_at(deadline, channel.list_files(output_dir)).await {
        Ok(Ok(ListFilesReply::Listing(listing))) => listing,
        Ok(Ok(ListFilesReply::Rejected(rejection))) => {
            warn!(error = %rejection.error, "guest refused to list output files");
            return (Vec::new(), Vec::new());
        }
        Ok(Err(e)) => {
            warn!(error = %e, "cannot list guest output files");
            return (Vec::new(), Vec::new());
        }
        Err(_) => {
            warn!(
                budget_ms = budget.as_millis() as u64,
                "guest did not list output files in time"
            );
            return (Vec::new(), Vec::new());
        }
    };

    // Agents without `entries` only report names; sizes are then checked
    // once the content has arrived.
    let sized = !listing.entries.is_empty() || listing.files.is_empty();
    let (candidates, mut dropped): (Vec<(String, Option<u64>)>, Vec<DroppedFile>) = if sized {
        let (accepted, dropped) = limits.select(listing.entries);
        (
            accepted
                .into_iter()
                .map(|entry| (entry.name, Some(entry.size)))
                .collect(),
            dropped,
        )
    } else {
        (
            listing
                .files
                .into_iter()
                .filter(|name| !name.starts_with('.'))
                .map(|name| (name, None))
                .collect(),
            Vec::new(),
        )
    };

    let mut admitted = limits.budget();
    let mut artifacts = Vec::with_capacity(candidates.len());
    let mut pending = candidates.into_iter();
    while let Some((name, size)) = pending.next() {
        let path = format!("{}/{}", output_dir.trim_end_matches('/'), name);
        let fetch = channel.get_file(&path, limits.max_file_size);
        let fetched = match timeout_at(deadline, fetch).await {
            Ok(fetched) => fetched,
            Err(_) => {
                warn!(
                    file = %name,
                    budget_ms = budget.as_millis() as u64,
                    "extraction out of time, dropping remaining files"
                );
                dropped.push(DroppedFile::new(name, size, DropReason::ExtractionTimeout));
                dropped.extend(pending.by_ref().map(|(name, size)| {
                    DroppedFile::new(name, size, DropReason::ExtractionTimeout)
                }));
                break;
            }
        };
        match fetched {
            Ok(FileFetch::Content(content)) => {
                let actual = content.len() as u64;
                if size.is_none() {
                    if is_ignored(&name, actual) {
                        continue;
                    }
                    if let Err(reason) = admitted.admit(actual) {
                        dropped.push(DroppedFile::new(name, Some(actual), reason));
                        continue;
                    }
                }
                debug!(file = %name, size = actual, "file retrieved from guest");
                artifacts.push(Artifact::new(name, content));
            }
            Ok(FileFetch::TooLarge(len)) => {
                dropped.push(DroppedFile::new(
                    name,
                    Some(len as u64),
                    DropReason::FileTooLarge,
                ));
            }
            Ok(FileFetch::Rejected(error)) => {
                warn!(file = %name, error = %error, "guest refused file");
                dropped.push(DroppedFile::new(name, size, DropReason::TransferFailed));
            }
            Err(e) => {
                warn!(file = %name, error = %e, "file transfer failed, stopping extraction");
                dropped.push(DroppedFile::new(name, size, DropReason::TransferFailed));
                break;
            }
        }
    }

    (artifacts, dropped)
}
