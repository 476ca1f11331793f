//! In-process guest agent wired to a host stream

use ember_agent::{AgentConfig, AgentResult, GuestAgent};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// Agent serving a temporary output directory.
pub struct AgentHarness {
    pub agent: GuestAgent,
    dir: TempDir,
}

impl AgentHarness {
    pub async fn new(interpreter: Vec<String>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::default()
            .with_output_dir(dir.path().join("output"))
            .with_interpreter(interpreter);
        let agent = GuestAgent::new(config).unwrap();
        agent.prepare().await.unwrap();
        Self { agent, dir }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub fn output_dir_str(&self) -> String {
        self.output_dir().to_string_lossy().into_owned()
    }

    /// Directory next to the output directory, unreachable through the agent.
    pub fn outside_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Serve one connection; the returned stream is the host end.
    pub fn connect(&self) -> (UnixStream, JoinHandle<AgentResult<()>>) {
        let (host, guest) = UnixStream::pair().unwrap();
        let agent = self.agent.clone();
        let served = tokio::spawn(async move { agent.serve_connection(guest).await });
        (host, served)
    }

    /// Listen on `socket` the way the VM monitor exposes vsock: answer
    /// `CONNECT <port>` with `OK`, then hand the stream to the agent.
    pub fn serve_vsock_shim(&self, socket: &Path, port: u32) -> JoinHandle<()> {
        let listener = UnixListener::bind(socket).unwrap();
        let agent = self.agent.clone();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut line = Vec::new();
            loop {
                let byte = stream.read_u8().await.unwrap();
                if byte == b'\n' {
                    break;
                }
                line.push(byte);
            }
            assert_eq!(String::from_utf8(line).unwrap(), format!("CONNECT {}", port));
            stream.write_all(b"OK 1073741824\n").await.unwrap();
            agent.serve_connection(stream).await.unwrap();
        })
    }
}
