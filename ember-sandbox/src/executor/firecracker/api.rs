//! Client for the Firecracker HTTP API on its Unix socket

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as HyperlocalUri};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{operation}: cannot build request: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: transport error on {}: {message}", socket.display())]
    Transport {
        operation: &'static str,
        socket: PathBuf,
        message: String,
    },

    #[error("{operation}: monitor answered {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("API socket {} not ready within {}ms (last error: {last_error})", socket.display(), timeout.as_millis())]
    NotReady {
        socket: PathBuf,
        timeout: Duration,
        last_error: String,
    },

    #[error("{operation}: no answer within {}ms", timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct BootSource<'a> {
    pub kernel_image_path: &'a Path,
    pub boot_args: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Drive<'a> {
    pub drive_id: &'a str,
    pub path_on_host: &'a Path,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

#[derive(Debug, Serialize)]
pub struct MachineConfig {
    pub vcpu_count: u32,
    pub mem_size_mib: u32,
}

#[derive(Debug, Serialize)]
pub struct VsockDevice<'a> {
    pub guest_cid: u32,
    pub uds_path: &'a Path,
}

#[derive(Debug, Serialize)]
pub struct InstanceAction {
    pub action_type: &'static str,
}

impl InstanceAction {
    pub fn start() -> Self {
        Self {
            action_type: "InstanceStart",
        }
    }
}

/// One monitor's API socket
pub struct FirecrackerApi {
    socket: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
    request_timeout: Duration,
}

impl FirecrackerApi {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            client: Client::unix(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Ceiling for each configuration request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Poll `GET /` until the monitor answers at all.
    pub async fn wait_ready(&self, timeout: Duration, poll_interval: Duration) -> Result<(), ApiError> {
        let started = Instant::now();
        let mut last_error = String::from("API socket did not answer");
        while started.elapsed() < timeout {
            if self.socket.exists() {
                let remaining = timeout.saturating_sub(started.elapsed());
                let request = self.send(Method::GET, "/", None, "api_ready");
                match tokio::time::timeout(remaining, request).await {
                    Ok(Ok(_)) => return Ok(()),
                    Ok(Err(e)) => last_error = e.to_string(),
                    Err(_) => {
                        last_error = String::from("API socket accepted but never answered");
                        break;
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
        Err(ApiError::NotReady {
            socket: self.socket.clone(),
            timeout,
            last_error,
        })
    }

    /// `PUT` a JSON body; any non-2xx answer is an error.
    pub async fn put<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        operation: &'static str,
    ) -> Result<(), ApiError> {
        let payload = serde_json::to_vec(body).map_err(|e| ApiError::Request {
            operation,
            message: e.to_string(),
        })?;
        let request = self.send(Method::PUT, path, Some(Bytes::from(payload)), operation);
        let (status, body) = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| ApiError::Timeout {
                operation,
                timeout: self.request_timeout,
            })??;
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                operation,
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        operation: &'static str,
    ) -> Result<(StatusCode, String), ApiError> {
        let uri: Uri = HyperlocalUri::new(&self.socket, path).into();
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("accept", "application/json");
        let body = match body {
            Some(payload) => {
                builder = builder.header("content-type", "application/json");
                Full::new(payload)
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder.body(body).map_err(|e| ApiError::Request {
            operation,
            message: e.to_string(),
        })?;

        let transport = |message: String| ApiError::Transport {
            operation,
            socket: self.socket.clone(),
            message,
        };
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| transport(e.to_string()))?
            .to_bytes();
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}
