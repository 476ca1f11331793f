//! Connection handling

use crate::actions;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use ember_common::{
    read_control, write_control, write_raw, AgentRequest, ErrorResponse, ProtocolError,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Guest agent bound to one output directory.
#[derive(Clone)]
pub struct GuestAgent {
    config: Arc<AgentConfig>,
}

impl GuestAgent {
    pub fn new(config: AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Create the output directory ahead of the first request.
    pub async fn prepare(&self) -> AgentResult<()> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        Ok(())
    }

    /// Serve one connection until the peer closes it.
    ///
    /// Requests that decode as JSON but not as a known action get an error
    /// reply and the loop continues. A frame that cannot be decoded at all
    /// ends the connection with an error.
    pub async fn serve_connection<S>(&self, mut stream: S) -> AgentResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let value: Value = match read_control(&mut stream).await {
                Ok(value) => value,
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            match serde_json::from_value::<AgentRequest>(value) {
                Ok(request) => self.dispatch(request, &mut stream).await?,
                Err(e) => {
                    debug!(error = %e, "rejecting malformed request");
                    let reply = ErrorResponse::new(format!("invalid request: {}", e));
                    write_control(&mut stream, &reply).await?;
                }
            }
        }
    }

    async fn dispatch<S>(&self, request: AgentRequest, stream: &mut S) -> AgentResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(action = request.action(), "dispatching request");

        match request {
            AgentRequest::Execute { code, timeout } => {
                info!(code_len = code.len(), timeout, "executing code");
                let response = actions::execute(&self.config, &code, timeout).await;
                info!(
                    success = response.success,
                    exit_code = ?response.exit_code,
                    timed_out = response.timed_out,
                    "execution finished"
                );
                write_control(stream, &response).await?;
            }
            AgentRequest::ListFiles { path } => {
                match actions::list_files(&self.config, &path).await {
                    Ok(listing) => write_control(stream, &listing).await?,
                    Err(e) => reject(stream, e).await?,
                }
            }
            AgentRequest::GetFile { path } => {
                match actions::read_output_file(&self.config, &path).await {
                    Ok(content) => write_raw(stream, &content).await?,
                    Err(e) => reject(stream, e).await?,
                }
            }
        }
        Ok(())
    }

    /// Accept connections on a Unix socket, one at a time.
    pub async fn serve_unix(&self, listener: UnixListener) -> AgentResult<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            debug!("accepted unix connection");
            self.finish_connection(stream).await;
        }
    }

    /// Accept connections on the guest vsock port, one at a time.
    #[cfg(target_os = "linux")]
    pub async fn serve_vsock(&self, port: u32) -> AgentResult<()> {
        #[allow(unused_mut)]
        let mut listener = bind_vsock_with_retry(port).await?;
        info!(port, "agent listening on vsock");

        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    debug!(port, "accepted vsock connection");
                    self.finish_connection(stream).await;
                }
                Err(e) => warn!(error = %e, "vsock accept failed"),
            }
        }
    }

    async fn finish_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.serve_connection(stream).await {
            Ok(()) => debug!("connection closed by host"),
            Err(e) => warn!(error = %e, "connection terminated"),
        }
    }
}

async fn reject<S>(stream: &mut S, error: AgentError) -> AgentResult<()>
where
    S: AsyncWrite + Unpin,
{
    warn!(error = %error, "request rejected");
    write_control(stream, &ErrorResponse::new(error.to_string())).await?;
    Ok(())
}

#[cfg(target_os = "linux")]
async fn bind_vsock_with_retry(port: u32) -> AgentResult<tokio_vsock::VsockListener> {
    use tokio_vsock::{VsockAddr, VsockListener, VMADDR_CID_ANY};

    const ATTEMPTS: u32 = 20;
    const BACKOFF: std::time::Duration = std::time::Duration::from_millis(250);

    let mut attempt = 1;
    loop {
        match VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < ATTEMPTS => {
                warn!(port, attempt, error = %e, "failed to bind vsock listener, retrying");
                attempt += 1;
                tokio::time::sleep(BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
