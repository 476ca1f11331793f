//! CLI command implementations

use anyhow::{bail, Context, Result};
use ember_sandbox::{
    parse_provider_list, ExecutionResult, ExecutorRegistry, ProviderHealth, SandboxConfig,
    SandboxService,
};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::info;

/// Load the configuration and apply command line overrides last.
pub fn load_config(
    path: Option<&Path>,
    provider: Option<String>,
    fallback: Option<String>,
) -> Result<SandboxConfig> {
    let mut config = SandboxConfig::load(path)?;
    if let Some(provider) = provider {
        config.executor.provider = provider;
    }
    if let Some(fallback) = fallback {
        config.executor.fallback_providers = parse_provider_list(&fallback);
    }
    config.validate()?;
    Ok(config)
}

/// Code from `--code`, a file, or stdin when the file is `-`.
pub async fn read_code(code: Option<String>, file: Option<&Path>) -> Result<String> {
    match (code, file) {
        (Some(code), _) => Ok(code),
        (None, Some(path)) if path == Path::new("-") => {
            let mut code = String::new();
            tokio::io::stdin()
                .read_to_string(&mut code)
                .await
                .context("Failed to read code from stdin")?;
            Ok(code)
        }
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => bail!("either --code or --file is required"),
    }
}

/// Execute `code` once; returns whether the run succeeded.
pub async fn execute_run(
    config: &SandboxConfig,
    code: &str,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<bool> {
    let service = SandboxService::from_config(config, &ExecutorRegistry::builtin())
        .context("Failed to initialize executors")?;

    let outcome = service.execute(code, timeout_secs).await;
    service.shutdown().await;
    let result = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(result.success)
}

/// Print provider health; returns whether any provider is healthy.
pub async fn execute_health(config: &SandboxConfig, json: bool) -> Result<bool> {
    let service = SandboxService::from_config(config, &ExecutorRegistry::builtin())
        .context("Failed to initialize executors")?;
    let report = service.health().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_health(&report);
    }
    Ok(report.iter().any(|provider| provider.healthy))
}

pub fn execute_providers(config: &SandboxConfig) {
    let registry = ExecutorRegistry::builtin();
    info!(count = registry.names().len(), "listing providers");
    for name in registry.names() {
        let role = if name == config.executor.provider {
            " (primary)"
        } else if config.executor.fallback_providers.contains(&name) {
            " (fallback)"
        } else {
            ""
        };
        println!("{}{}", name, role);
    }
}

fn print_result(result: &ExecutionResult) {
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    let provider = result.metadata.provider.as_deref().unwrap_or("none");
    let status = if result.success { "ok" } else { "failed" };
    eprintln!(
        "--- {} via {} in {:.3}s (exit code: {})",
        status,
        provider,
        result.duration_seconds,
        result
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    if let Some(error) = &result.error {
        eprintln!("error: {}", error);
    }
    for url in &result.files {
        eprintln!("file: {}", url);
    }
    for dropped in &result.metadata.dropped_files {
        eprintln!("dropped: {} ({})", dropped.name, dropped.reason);
    }
}

fn print_health(report: &[ProviderHealth]) {
    for provider in report {
        println!(
            "{:<12} {:<10} {}",
            provider.name,
            if provider.healthy { "healthy" } else { "unhealthy" },
            provider.checked_at.to_rfc3339()
        );
    }
}
