use anyhow::{Context, Result};
use clap::Parser;
use ember_agent::{AgentConfig, GuestAgent};
use ember_common::{DEFAULT_AGENT_PORT, DEFAULT_MAX_OUTPUT_BYTES, GUEST_OUTPUT_DIR};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ember-agent")]
#[command(about = "In-guest execution agent for ember microVMs")]
#[command(version)]
struct Cli {
    /// vsock port to listen on
    #[arg(short, long, default_value_t = DEFAULT_AGENT_PORT)]
    port: u32,

    /// Working directory of every run; the only directory served to the host
    #[arg(short, long, default_value = GUEST_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Interpreter command line; the code is appended as the last argument
    #[arg(short, long, default_value = "python3 -c", value_delimiter = ' ')]
    interpreter: Vec<String>,

    /// Maximum stdout/stderr bytes returned per stream
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,

    /// Listen on this Unix socket instead of vsock
    #[arg(long)]
    unix: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "ember_agent={},ember_common={}",
                    log_level, log_level
                ))
            }),
        )
        .init();

    let config = AgentConfig::default()
        .with_output_dir(cli.output_dir)
        .with_interpreter(cli.interpreter.into_iter().filter(|arg| !arg.is_empty()))
        .with_max_output_bytes(cli.max_output_bytes);
    let agent = GuestAgent::new(config)?;
    agent
        .prepare()
        .await
        .context("failed to create output directory")?;

    match cli.unix {
        Some(path) => {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
            }
            let listener = tokio::net::UnixListener::bind(&path)
                .with_context(|| format!("failed to bind {}", path.display()))?;
            tracing::info!(socket = %path.display(), "agent listening on unix socket");
            agent.serve_unix(listener).await?;
        }
        None => serve_vsock(&agent, cli.port).await?,
    }

    Ok(())
}

#[cfg(target_os = "linux")]
async fn serve_vsock(agent: &GuestAgent, port: u32) -> Result<()> {
    agent.serve_vsock(port).await?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn serve_vsock(_agent: &GuestAgent, port: u32) -> Result<()> {
    anyhow::bail!("vsock port {} is only available on Linux; use --unix", port)
}
