mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Run untrusted code in microVMs, containers or processes")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute code once and print the result
    Run {
        /// Code to execute
        #[arg(short = 'e', long, conflicts_with = "file")]
        code: Option<String>,

        /// Read the code from a file ("-" for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Timeout in seconds (default from configuration)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Override the primary provider
        #[arg(short, long)]
        provider: Option<String>,

        /// Override the fallback providers (comma-separated)
        #[arg(long)]
        fallback: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check the health of every configured provider
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the providers compiled into this build
    Providers,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            code,
            file,
            timeout,
            provider,
            fallback,
            json,
        } => {
            let code = commands::read_code(code, file.as_deref()).await?;
            let config = commands::load_config(cli.config.as_deref(), provider, fallback)?;
            let success = commands::execute_run(&config, &code, timeout, json).await?;
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Health { json } => {
            let config = commands::load_config(cli.config.as_deref(), None, None)?;
            let healthy = commands::execute_health(&config, json).await?;
            Ok(if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Providers => {
            let config = commands::load_config(cli.config.as_deref(), None, None)?;
            commands::execute_providers(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            let config = commands::load_config(cli.config.as_deref(), None, None)?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr, and to `log_file` through a non-blocking writer.
fn init_logging(verbose: bool, log_file: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "ember_cli={},ember_sandbox={},ember_common={}",
            log_level, log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("invalid log file path {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}
