//! Host side of the guest agent connection
//!
//! Firecracker exposes guest vsock ports through a Unix socket: the host
//! writes `CONNECT <port>\n` and the monitor answers `OK <host port>\n`
//! before the stream carries agent frames.

use crate::error::{Result, SandboxError};
use bytes::Bytes;
use ember_common::{
    read_control, read_frame_len, read_raw_body, skip_raw_body, write_control, AgentRequest,
    ErrorResponse, ExecuteResponse, ListFilesReply,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

const MAX_HANDSHAKE_LINE: usize = 64;

/// Connect to guest `port` through the monitor's vsock socket, retrying
/// until the agent accepts or `timeout` passes.
pub async fn connect_vsock(
    uds_path: &Path,
    port: u32,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<UnixStream> {
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        if uds_path.exists() {
            attempts += 1;
            let remaining = timeout.saturating_sub(started.elapsed());
            let attempt = tokio::time::timeout(remaining, try_connect(uds_path, port)).await;
            match attempt {
                Err(_) => {
                    debug!(port, attempts, "guest agent stalled during handshake");
                    return Err(SandboxError::AgentTimeout { timeout });
                }
                Ok(Ok(stream)) => {
                    debug!(
                        port,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "guest agent connected"
                    );
                    return Ok(stream);
                }
                Ok(Err(e)) => debug!(port, attempts, error = %e, "guest agent not ready"),
            }
        }
        if started.elapsed() + poll_interval > timeout {
            return Err(SandboxError::AgentTimeout { timeout });
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn try_connect(uds_path: &Path, port: u32) -> std::io::Result<UnixStream> {
    let mut stream = UnixStream::connect(uds_path).await?;
    handshake(&mut stream, port).await?;
    Ok(stream)
}

/// Perform the `CONNECT` exchange on an open stream.
pub async fn handshake<S>(stream: &mut S, port: u32) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(format!("CONNECT {}\n", port).as_bytes())
        .await?;
    stream.flush().await?;

    // Byte by byte so nothing after the newline is consumed.
    let mut line = Vec::with_capacity(16);
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() == MAX_HANDSHAKE_LINE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "handshake reply too long",
            ));
        }
        line.push(byte);
    }

    let reply = String::from_utf8_lossy(&line);
    if reply.starts_with("OK ") {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("unexpected handshake reply '{}'", reply.trim()),
        ))
    }
}

/// Outcome of a `get_file` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFetch {
    Content(Bytes),
    /// Body longer than the caller's ceiling; skipped without buffering
    TooLarge(usize),
    Rejected(String),
}

/// Typed requests over one agent connection.
pub struct AgentChannel<S> {
    stream: S,
}

impl<S> AgentChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn execute(&mut self, code: &str, timeout_secs: u64) -> Result<ExecuteResponse> {
        let request = AgentRequest::Execute {
            code: code.to_string(),
            timeout: timeout_secs,
        };
        write_control(&mut self.stream, &request).await?;
        Ok(read_control(&mut self.stream).await?)
    }

    pub async fn list_files(&mut self, path: &str) -> Result<ListFilesReply> {
        let request = AgentRequest::ListFiles {
            path: path.to_string(),
        };
        write_control(&mut self.stream, &request).await?;
        Ok(read_control(&mut self.stream).await?)
    }

    /// Fetch one file, refusing bodies longer than `max_len`.
    pub async fn get_file(&mut self, path: &str, max_len: u64) -> Result<FileFetch> {
        let request = AgentRequest::GetFile {
            path: path.to_string(),
        };
        write_control(&mut self.stream, &request).await?;

        let len = read_frame_len(&mut self.stream).await?;
        if len as u64 > max_len {
            skip_raw_body(&mut self.stream, len).await?;
            return Ok(FileFetch::TooLarge(len));
        }

        let body = read_raw_body(&mut self.stream, len).await?;
        if let Some(rejection) = ErrorResponse::from_frame(&body) {
            return Ok(FileFetch::Rejected(rejection.error));
        }
        Ok(FileFetch::Content(body))
    }
}
