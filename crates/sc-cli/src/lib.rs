//! supercoder CLI: drives turns through the edit engine and exposes undo.

pub mod commands;
pub mod task_execution;

mod cli_args;
mod ui_writer_impl;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use sc_config::{Config, ToolCallFormat};
use sc_core::{spawn_interrupt_watcher, EditEngine, InterruptCoordinator, TurnRunner, UiWriter};

pub use cli_args::{Cli, Command};
pub use ui_writer_impl::ConsoleUiWriter;

use task_execution::{execute_turn, spawn_ctrl_c_listener, summarize_turn, ApplyOptions};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    initialize_logging(&cli);
    execute(cli).await
}

/// Run a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let workspace_dir = determine_workspace_dir(&cli)?;
    let config = load_config_with_cli_overrides(&cli)?;
    let mut engine = EditEngine::from_config(&workspace_dir, &config.checkpoints)
        .with_context(|| {
            format!(
                "Failed to open checkpoint store under {}",
                workspace_dir.display()
            )
        })?;
    debug!(
        "Workspace {} with format {}",
        workspace_dir.display(),
        config.agent.tool_call_format
    );

    let ui = Arc::new(ConsoleUiWriter::new());
    match cli.command {
        Command::Apply {
            file,
            chunk_size,
            chunk_delay_ms,
        } => {
            let response = read_response(file).await?;
            let options = ApplyOptions {
                chunk_size: usize::try_from(chunk_size).unwrap_or(usize::MAX),
                chunk_delay: Duration::from_millis(chunk_delay_ms),
            };
            run_apply(engine, &config, &response, &options, ui).await
        }
        Command::Checkpoints => {
            commands::print_checkpoints(&engine, &*ui);
            Ok(())
        }
        Command::Undo { id } => {
            commands::undo(&mut engine, id.as_deref(), &*ui)?;
            Ok(())
        }
    }
}

async fn run_apply(
    engine: EditEngine,
    config: &Config,
    response: &str,
    options: &ApplyOptions,
    ui: Arc<ConsoleUiWriter>,
) -> Result<()> {
    let coordinator = InterruptCoordinator::new(Arc::new(Mutex::new(engine)));
    let runner = TurnRunner::new(coordinator.clone(), config.agent.tool_call_format);

    let (presses, press_receiver) = mpsc::channel(4);
    let watcher = spawn_interrupt_watcher(
        press_receiver,
        coordinator,
        Duration::from_millis(config.interrupt.double_press_window_ms),
        Arc::clone(&ui),
    );
    let listener = spawn_ctrl_c_listener(presses);

    let result = execute_turn(&runner, response, options, &*ui).await;

    listener.abort();
    let _ = watcher.await;

    let report = result?;
    ui.println(&summarize_turn(&report));
    Ok(())
}

async fn read_response(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read response file {}", path.display())),
        None => {
            let mut response = String::new();
            tokio::io::stdin()
                .read_to_string(&mut response)
                .await
                .context("Failed to read response from stdin")?;
            Ok(response)
        }
    }
}

// --- Helper functions ---

fn initialize_logging(cli: &Cli) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "supercoder={level},sc_cli={level},sc_core={level},sc_config={level}",
            level = level
        ))
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn determine_workspace_dir(cli: &Cli) -> Result<PathBuf> {
    let workspace = match &cli.workspace {
        Some(ws) => ws.clone(),
        None => std::env::current_dir()?,
    };
    std::fs::canonicalize(&workspace)
        .with_context(|| format!("Workspace {} is not accessible", workspace.display()))
}

fn load_config_with_cli_overrides(cli: &Cli) -> Result<Config> {
    let format_override = cli
        .format
        .as_deref()
        .map(str::parse::<ToolCallFormat>)
        .transpose()?;
    Config::load_with_overrides(cli.config.as_deref(), format_override)
}
