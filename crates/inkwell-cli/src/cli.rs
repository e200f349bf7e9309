//! CLI argument definitions for Inkwell.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use inkwell_agent::ApprovalMode;

/// Inkwell -- a writing assistant for book manuscripts.
#[derive(Parser)]
#[command(
    name = "inkwell",
    version,
    about = "Inkwell -- AI writing assistant for book manuscripts",
    long_about = "Chat with a language model that can read and edit the chapters and \
                  entities of your books, asking before it changes anything."
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, default_value = "inkwell.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat session.
    Chat {
        /// Library file to work on.  Created on exit if it does not exist.
        #[arg(long, short)]
        library: Option<PathBuf>,

        /// Plain chat without tools.
        #[arg(long)]
        no_agent: bool,

        /// Which tool calls need confirmation.
        #[arg(long, value_enum)]
        approval: Option<ApprovalArg>,

        /// Upper bound on model round trips per prompt.
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// List the models the configured provider offers.
    Models,

    /// Check that the configured provider is reachable.
    Ping,
}

/// Approval mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApprovalArg {
    None,
    WriteOnly,
    All,
}

impl From<ApprovalArg> for ApprovalMode {
    fn from(arg: ApprovalArg) -> Self {
        match arg {
            ApprovalArg::None => ApprovalMode::None,
            ApprovalArg::WriteOnly => ApprovalMode::WriteOnly,
            ApprovalArg::All => ApprovalMode::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::parse_from([
            "inkwell",
            "--log-json",
            "chat",
            "--library",
            "books.json",
            "--approval",
            "write-only",
            "--max-iterations",
            "3",
        ]);
        assert!(cli.log_json);
        assert_eq!(cli.config, PathBuf::from("inkwell.toml"));
        let Commands::Chat {
            library,
            no_agent,
            approval,
            max_iterations,
        } = cli.command
        else {
            panic!("expected chat");
        };
        assert_eq!(library, Some(PathBuf::from("books.json")));
        assert!(!no_agent);
        assert_eq!(approval.map(ApprovalMode::from), Some(ApprovalMode::WriteOnly));
        assert_eq!(max_iterations, Some(3));
    }

    #[test]
    fn config_flag_after_subcommand() {
        let cli = Cli::parse_from(["inkwell", "ping", "--config", "other.toml"]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Commands::Ping));
    }
}
