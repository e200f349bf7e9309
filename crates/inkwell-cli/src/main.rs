//! CLI entry point for Inkwell.
//!
//! This binary provides the `inkwell` command: an interactive chat over a
//! book library plus two provider diagnostics.

mod cli;
mod commands;
mod helpers;
mod repl;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, load_config};
use crate::repl::ChatOptions;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env is fine; credentials may come from the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing("info", cli.log_json);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Chat {
            library,
            no_agent,
            approval,
            max_iterations,
        } => {
            let mut settings = config.agent.clone();
            if no_agent {
                settings.enabled = false;
            }
            if let Some(mode) = approval {
                settings.approval_mode = mode.into();
            }
            if let Some(max) = max_iterations {
                settings.max_iterations = max.max(1);
            }
            info!(
                enabled = settings.enabled,
                approval = %settings.approval_mode,
                max_iterations = settings.max_iterations,
                "agent settings"
            );
            repl::cmd_chat(config, ChatOptions { library, settings }).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models => commands::cmd_models(&config).await,
        Commands::Ping => commands::cmd_ping(&config).await,
    }
}
