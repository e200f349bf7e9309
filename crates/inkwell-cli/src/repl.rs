//! Subcommand: `inkwell chat` -- interactive REPL.
//!
//! Reads prompts from stdin and hands them to the orchestrator.  While a
//! run is in progress, stdin stays live: `/stop` cancels the run and a
//! pending tool call is answered with `y` or `n`.

use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use inkwell_agent::{
    AgentEvent, AgentOrchestrator, AgenticSettings, ExecutionStatus, InkwellConfig, RunOutcome,
    RunReport, StoreAccess, ToolRegistry, build_provider,
};
use inkwell_store::{BookRecord, Library, MemoryStore};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::helpers::{preview, render_message};

/// Slug of the book created for a fresh library.
const DEFAULT_BOOK: &str = "notebook";

/// Options of the `chat` subcommand after merging with the config.
pub struct ChatOptions {
    pub library: Option<PathBuf>,
    pub settings: AgenticSettings,
}

/// Run the interactive REPL.
pub async fn cmd_chat(config: InkwellConfig, options: ChatOptions) -> Result<()> {
    let provider = build_provider(&config.provider).context("failed to create provider")?;
    let registry = ToolRegistry::builtin().context("failed to build the tool catalog")?;
    let orchestrator = Arc::new(
        AgentOrchestrator::new(provider.clone(), registry)
            .with_context(config.context.clone())
            .with_streaming(true),
    );

    let store = Arc::new(open_library(options.library.as_ref())?);
    let books = store.books().await;

    println!();
    println!("  Inkwell v{}", env!("CARGO_PKG_VERSION"));
    println!("  Provider: {} ({})", provider.name(), provider.model());
    if options.settings.enabled {
        println!(
            "  Agent: on, approval {}, up to {} steps",
            options.settings.approval_mode, options.settings.max_iterations
        );
    } else {
        println!("  Agent: off");
    }
    let slugs: Vec<&str> = books.iter().map(|b| b.slug.as_str()).collect();
    println!("  Books: {}", slugs.join(", "));
    println!("  Commands: /history, /clear, /stop, /quit");
    println!();

    let mut lines = spawn_stdin_reader();
    let mut events = orchestrator.subscribe();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        let Some(line) = lines.recv().await else {
            println!();
            info!("EOF received, exiting");
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                for message in orchestrator.messages() {
                    println!("{}", render_message(&message));
                }
                continue;
            }
            "/clear" => {
                match orchestrator.clear_history() {
                    Ok(()) => println!("  History cleared."),
                    Err(e) => println!("  {e}"),
                }
                continue;
            }
            "/stop" => {
                println!("  Nothing is running.");
                continue;
            }
            _ => {}
        }

        let run = {
            let orchestrator = Arc::clone(&orchestrator);
            let settings = options.settings.clone();
            let run_store: Arc<dyn StoreAccess> = store.clone();
            let prompt = input.to_owned();
            tokio::spawn(async move { orchestrator.submit(&prompt, &settings, run_store).await })
        };

        let report = drive_run(run, &orchestrator, &store, &mut events, &mut lines).await?;
        print_report(&report);
    }

    if let Some(path) = &options.library
        && (store.is_dirty() || !path.exists())
    {
        store
            .save(path)
            .await
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("  Saved {}", path.display());
    }

    info!("shutting down");
    Ok(())
}

/// Forward events to the terminal and stdin to the orchestrator until the
/// run finishes.
async fn drive_run(
    mut run: tokio::task::JoinHandle<inkwell_agent::Result<RunReport>>,
    orchestrator: &Arc<AgentOrchestrator>,
    store: &Arc<MemoryStore>,
    events: &mut broadcast::Receiver<AgentEvent>,
    lines: &mut mpsc::UnboundedReceiver<String>,
) -> Result<RunReport> {
    let mut awaiting_approval = false;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            joined = &mut run => {
                // Events sent right before the task ended may still be queued.
                while let Ok(event) = events.try_recv() {
                    print_event(&event);
                }
                println!();
                let report = joined.context("agent task panicked")??;
                return Ok(report);
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let AgentEvent::ApprovalRequested(_) = &event {
                        awaiting_approval = true;
                    }
                    print_event(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "terminal fell behind the event feed");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
            line = lines.recv(), if stdin_open => {
                let Some(line) = line else {
                    // stdin closed mid-run: stop instead of waiting forever.
                    stdin_open = false;
                    orchestrator.stop();
                    continue;
                };
                let answer = line.trim();
                if answer == "/stop" {
                    orchestrator.stop();
                } else if awaiting_approval {
                    awaiting_approval = false;
                    if matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
                        orchestrator.approve(store.clone());
                    } else {
                        orchestrator.reject("declined at the prompt");
                    }
                } else if !answer.is_empty() {
                    println!("\n  Still working. Type /stop to cancel.");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop();
            }
        }
    }
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::TextDelta(text) => {
            print!("{text}");
            io::stdout().flush().ok();
        }
        AgentEvent::ApprovalRequested(pending) => {
            println!();
            println!("  The assistant wants to run:");
            for line in pending.description.lines() {
                println!("    {line}");
            }
            print!("  approve? [y/N] ");
            io::stdout().flush().ok();
        }
        AgentEvent::ExecutionUpdated(execution) => match execution.status {
            ExecutionStatus::Running => {
                println!("\n  [{}] running", execution.tool_call.name);
            }
            ExecutionStatus::Completed | ExecutionStatus::Error => {
                let summary = execution
                    .result
                    .as_ref()
                    .map(|r| preview(&r.content, 80))
                    .unwrap_or_default();
                println!("  [{}] {}: {summary}", execution.tool_call.name, execution.status);
            }
            ExecutionStatus::Rejected => {
                println!("  [{}] rejected", execution.tool_call.name);
            }
            ExecutionStatus::Pending | ExecutionStatus::Approved => {}
        },
        AgentEvent::MessageAppended(message) if message.is_error => {
            println!("\n  {}", message.content);
        }
        AgentEvent::MessageAppended(_)
        | AgentEvent::StatusChanged(_)
        | AgentEvent::RunFinished(_) => {}
    }
}

fn print_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Completed if report.iterations > 1 => {
            println!("  ({} model turns)", report.iterations);
        }
        RunOutcome::Completed | RunOutcome::Failed(_) => {}
        RunOutcome::MaxIterations => {
            println!("  (stopped after {} turns; raise --max-iterations to allow more)", report.iterations);
        }
        RunOutcome::Rejected => println!("  (run ended: tool call rejected)"),
        RunOutcome::Cancelled => println!("  (stopped)"),
    }
    println!();
}

/// Open the library file, or start a fresh one with an empty book.
fn open_library(path: Option<&PathBuf>) -> Result<MemoryStore> {
    match path {
        Some(path) if path.exists() => MemoryStore::open(path)
            .with_context(|| format!("failed to open library {}", path.display())),
        _ => {
            let mut library = Library::default();
            library.insert(BookRecord::new(DEFAULT_BOOK, "Notebook"))?;
            Ok(MemoryStore::new(library))
        }
    }
}

/// Read stdin on a dedicated thread so prompts and approvals can arrive
/// while a run is awaited.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}
