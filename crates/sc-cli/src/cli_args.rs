//! CLI argument parsing for supercoder.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Clone, Debug)]
#[command(name = "supercoder")]
#[command(about = "Apply model-proposed edits with per-turn checkpoints and rollback")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Project root (defaults to current directory)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Override the configured tool-call format (e.g. 'qwen_like')
    #[arg(long, value_name = "FORMAT", global = true)]
    pub format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Stream a recorded model response through one turn
    Apply {
        /// Response file; reads stdin when omitted
        file: Option<PathBuf>,

        /// Characters per streamed fragment
        #[arg(long, default_value = "64", value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: u64,

        /// Pause between fragments, to leave room for an interrupt
        #[arg(long, default_value = "0", value_name = "MS")]
        chunk_delay_ms: u64,
    },

    /// List checkpoints, newest first
    Checkpoints,

    /// Undo a checkpoint (the newest when no id is given)
    Undo {
        /// Checkpoint id as shown by `supercoder checkpoints`
        id: Option<String>,
    },
}
