//! Shared helpers for the CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use inkwell_agent::{InkwellConfig, Message, Role};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber.
///
/// Logs go to stderr so they never mix with chat output.  `RUST_LOG`
/// overrides `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the configuration file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<InkwellConfig> {
    let mut config = InkwellConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .apply_env()
        .context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    info!(
        provider = %config.provider.kind,
        model = %config.provider.model_name(),
        "configuration ready"
    );
    Ok(config)
}

// ---------------------------------------------------------------------------
// Transcript rendering
// ---------------------------------------------------------------------------

/// Longest tool output shown in the transcript.
const RESULT_PREVIEW: usize = 200;

/// Render one conversation message for the terminal.
pub fn render_message(message: &Message) -> String {
    let mut out = match message.role {
        Role::User => format!("you: {}", message.content),
        Role::System => format!("system: {}", message.content),
        Role::Assistant if message.is_error => format!("!! {}", message.content),
        Role::Assistant => format!("inkwell: {}", message.content),
        Role::ToolResult => {
            let marker = match &message.tool_result {
                Some(r) if r.is_error => "tool failed",
                _ => "tool",
            };
            format!("  [{marker}] {}", preview(&message.content, RESULT_PREVIEW))
        }
    };
    for call in &message.tool_calls {
        out.push_str(&format!("\n  -> {}({})", call.name, call.arguments));
    }
    out
}

/// First line of `text`, cut at `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut cut: String = line.chars().take(max).collect();
    if cut.len() < line.len() || text.lines().nth(1).is_some() {
        cut.push_str(" ...");
    }
    cut
}
