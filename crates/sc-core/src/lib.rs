//! Action execution core of the supercoder agent.
//!
//! A model response streams in as text fragments. [`StreamingToolParser`]
//! pulls tool calls out of that text in the session's configured syntax,
//! [`EditOperation`] turns each call into a typed file edit, and
//! [`EditEngine`] applies the edits in order under a per-turn [`Checkpoint`]
//! that can be rolled back if the user interrupts the turn, or undone later.

pub mod atomic_write;
pub mod checkpoint;
pub mod edit_engine;
pub mod edit_ops;
pub mod error_handling;
pub mod interrupt;
pub mod paths;
pub mod streaming_parser;
pub mod turn;
pub mod ui_writer;

use std::ops::Range;

use serde::{Deserialize, Serialize};

pub use sc_config::ToolCallFormat;

pub use atomic_write::write_atomic;
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointState};
pub use edit_engine::{EditEngine, OperationOutcome};
pub use edit_ops::{EditOperation, FileMutation, FileView, OperationKind};
pub use error_handling::{CheckpointError, EditError};
pub use interrupt::{
    spawn_interrupt_watcher, InterruptCoordinator, InterruptHandler, InterruptOutcome,
    PressOutcome, TurnHandle, TurnStatus,
};
pub use streaming_parser::StreamingToolParser;
pub use turn::{TurnReport, TurnRunner};
pub use ui_writer::{NullUiWriter, UiWriter};

/// A tool call decoded from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    /// Arguments in the order the model wrote them
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Byte range of the raw call in the response text
    pub span: Range<usize>,
    pub format: ToolCallFormat,
}
