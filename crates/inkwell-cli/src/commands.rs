//! Subcommands that talk to the provider without opening a session.

use std::process::ExitCode;

use anyhow::{Context, Result};
use inkwell_agent::{InkwellConfig, build_provider};
use tracing::{info, warn};

/// Subcommand: `inkwell models`.
pub async fn cmd_models(config: &InkwellConfig) -> Result<ExitCode> {
    let provider = build_provider(&config.provider).context("failed to create provider")?;
    let models = provider.list_models().await;

    if models.is_empty() {
        warn!(provider = provider.name(), "no models reported");
        println!("No models reported by {}.", provider.name());
        return Ok(ExitCode::FAILURE);
    }

    for model in &models {
        let marker = if model == provider.model() { "*" } else { " " };
        println!("{marker} {model}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Subcommand: `inkwell ping`.
///
/// Exits non-zero when the provider cannot be reached.
pub async fn cmd_ping(config: &InkwellConfig) -> Result<ExitCode> {
    let provider = build_provider(&config.provider).context("failed to create provider")?;
    let endpoint = config.provider.base_url();

    if provider.test_connection().await {
        info!(provider = provider.name(), %endpoint, "provider reachable");
        println!("{} at {endpoint}: ok", provider.name());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} at {endpoint}: unreachable", provider.name());
        Ok(ExitCode::FAILURE)
    }
}
