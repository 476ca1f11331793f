//! Action handlers

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use ember_common::{
    list_output_files, truncate_output, wait_capped, ExecuteResponse, ListFilesResponse,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run `code` through the configured interpreter inside the output directory.
///
/// Never fails: spawn errors and timeouts are reported in the response.
pub async fn execute(config: &AgentConfig, code: &str, timeout_secs: u64) -> ExecuteResponse {
    let Some((program, args)) = config.interpreter.split_first() else {
        return failure("no interpreter configured".to_string());
    };

    if let Err(e) = tokio::fs::create_dir_all(&config.output_dir).await {
        return failure(format!(
            "cannot prepare output directory {}: {}",
            config.output_dir.display(),
            e
        ));
    }

    let child = Command::new(program)
        .args(args)
        .arg(code)
        .current_dir(&config.output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => return failure(format!("failed to spawn {}: {}", program, e)),
    };

    // The child is killed when dropped on timeout.
    let waited = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        wait_capped(&mut child, config.max_output_bytes),
    )
    .await;

    match waited {
        Ok(Ok(output)) => {
            let exit_code = output.status.code();
            ExecuteResponse {
                success: output.status.success(),
                stdout: truncate_output(&output.stdout, config.max_output_bytes),
                stderr: truncate_output(&output.stderr, config.max_output_bytes),
                exit_code,
                error: exit_code
                    .is_none()
                    .then(|| "process terminated by signal".to_string()),
                timed_out: false,
            }
        }
        Ok(Err(e)) => failure(format!("failed to collect process output: {}", e)),
        Err(_) => {
            tracing::warn!(timeout_secs, "execution timed out, process killed");
            ExecuteResponse {
                success: false,
                exit_code: None,
                error: Some(format!("execution timed out after {}s", timeout_secs)),
                timed_out: true,
                ..Default::default()
            }
        }
    }
}

fn failure(error: String) -> ExecuteResponse {
    ExecuteResponse {
        success: false,
        error: Some(error),
        ..Default::default()
    }
}

/// List regular, non-hidden files directly inside the output directory.
///
/// `path` must name the output directory itself.
pub async fn list_files(config: &AgentConfig, path: &str) -> AgentResult<ListFilesResponse> {
    let root = canonical_output_dir(config).await?;
    let requested = absolutize(&config.output_dir, path);
    let requested = match tokio::fs::canonicalize(&requested).await {
        Ok(resolved) => resolved,
        Err(_) => return Err(AgentError::PathOutsideOutputDir { path: requested }),
    };
    if requested != root {
        return Err(AgentError::PathOutsideOutputDir { path: requested });
    }

    let entries = list_output_files(&root).await?;
    Ok(ListFilesResponse::from_entries(entries))
}

/// Resolve `path` to a regular file strictly inside the output directory.
///
/// Relative paths are taken relative to the output directory. Symlinks are
/// resolved before the containment check.
pub async fn resolve_output_path(config: &AgentConfig, path: &str) -> AgentResult<PathBuf> {
    let root = canonical_output_dir(config).await?;
    let candidate = absolutize(&config.output_dir, path);

    let resolved = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|source| AgentError::Access {
            path: candidate.clone(),
            source,
        })?;

    if resolved == root || !resolved.starts_with(&root) {
        return Err(AgentError::PathOutsideOutputDir { path: candidate });
    }

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|source| AgentError::Access {
            path: resolved.clone(),
            source,
        })?;
    if !metadata.is_file() {
        return Err(AgentError::NotAFile { path: resolved });
    }

    Ok(resolved)
}

/// Read a file from the output directory after validating its path.
pub async fn read_output_file(config: &AgentConfig, path: &str) -> AgentResult<Vec<u8>> {
    let resolved = resolve_output_path(config, path).await?;
    tokio::fs::read(&resolved)
        .await
        .map_err(|source| AgentError::Access {
            path: resolved,
            source,
        })
}

async fn canonical_output_dir(config: &AgentConfig) -> AgentResult<PathBuf> {
    tokio::fs::create_dir_all(&config.output_dir).await?;
    Ok(tokio::fs::canonicalize(&config.output_dir).await?)
}

fn absolutize(output_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        output_dir.join(path)
    }
}
