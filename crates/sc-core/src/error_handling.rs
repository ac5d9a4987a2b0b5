//! Error taxonomy for applying edits and managing checkpoints.
//!
//! This module provides:
//! - `EditError`, one variant per way an edit operation can fail
//! - `CheckpointError` for the checkpoint store
//! - Classification of errors as recoverable (reported back to the model) or not
//! - Rendering of failures as tool results

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure of a single edit operation.
///
/// Every variant except `Checkpoint` and `Interrupted` is scoped to the one
/// operation that produced it; the rest of the turn carries on.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("invalid {kind} call: {problem}")]
    Validation { kind: String, problem: String },

    #[error("{what} not found in {path}")]
    NotFound { path: PathBuf, what: String },

    #[error("search text occurs {count} times in {path}; it must occur exactly once")]
    AmbiguousMatch { path: PathBuf, count: usize },

    #[error("lines {start}-{end} are out of range for {path} ({line_count} lines)")]
    OutOfRange {
        path: PathBuf,
        start: i64,
        end: i64,
        line_count: usize,
    },

    #[error("{path} already exists (set overwrite to replace it)")]
    AlreadyExists { path: PathBuf },

    #[error("failed to {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("turn was interrupted before the operation ran")]
    Interrupted,
}

impl EditError {
    pub fn validation(kind: impl Into<String>, problem: impl Into<String>) -> Self {
        EditError::Validation {
            kind: kind.into(),
            problem: problem.into(),
        }
    }

    pub fn io(operation: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        EditError::Io {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Name of the error class as reported to the model.
    pub fn class(&self) -> &'static str {
        match self {
            EditError::Validation { .. } => "ValidationError",
            EditError::NotFound { .. } => "NotFoundError",
            EditError::AmbiguousMatch { .. } => "AmbiguousMatchError",
            EditError::OutOfRange { .. } => "OutOfRangeError",
            EditError::AlreadyExists { .. } => "AlreadyExistsError",
            EditError::Io { .. } => "IOError",
            EditError::Checkpoint(CheckpointError::Corrupt { .. }) => "CheckpointCorruptionError",
            EditError::Checkpoint(_) => "CheckpointError",
            EditError::Interrupted => "Interrupted",
        }
    }

    /// Whether the model can react to this failure and keep going.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EditError::Checkpoint(_) | EditError::Interrupted)
    }

    /// Render as a failed tool result.
    pub fn to_tool_result(&self) -> String {
        format!("❌ {}: {}", self.class(), self)
    }
}

/// Failure inside the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {open_id} of turn {turn} is still open")]
    TurnInProgress { open_id: String, turn: u64 },

    #[error("no open checkpoint to record changes in")]
    NoOpenCheckpoint,

    #[error("no checkpoint with id {id}")]
    NotFound { id: String },

    #[error("there are no committed checkpoints to undo")]
    NothingToUndo,

    #[error("checkpoint {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("rollback of checkpoint {id} could not restore {}", join_paths(.failed))]
    RestoreIncomplete { id: String, failed: Vec<PathBuf> },

    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint metadata could not be encoded: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl CheckpointError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CheckpointError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_errors_are_recoverable() {
        let errors = [
            EditError::validation("create", "missing argument 'path'"),
            EditError::NotFound {
                path: PathBuf::from("a.txt"),
                what: "search text".to_string(),
            },
            EditError::AmbiguousMatch {
                path: PathBuf::from("a.txt"),
                count: 2,
            },
            EditError::io(
                "write",
                "a.txt",
                io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            ),
        ];
        for error in errors {
            assert!(error.is_recoverable(), "{} should be recoverable", error);
        }
    }

    #[test]
    fn test_checkpoint_errors_are_not_recoverable() {
        let error = EditError::from(CheckpointError::TurnInProgress {
            open_id: "x".to_string(),
            turn: 3,
        });
        assert!(!error.is_recoverable());
        assert_eq!(error.class(), "CheckpointError");
        assert!(!EditError::Interrupted.is_recoverable());
    }

    #[test]
    fn test_tool_result_names_the_error_class() {
        let error = EditError::OutOfRange {
            path: PathBuf::from("f.txt"),
            start: 2,
            end: 5,
            line_count: 3,
        };
        let rendered = error.to_tool_result();
        assert!(rendered.starts_with("❌ OutOfRangeError"));
        assert!(rendered.contains("f.txt (3 lines)"));
    }

    #[test]
    fn test_restore_incomplete_lists_paths() {
        let error = CheckpointError::RestoreIncomplete {
            id: "cp".to_string(),
            failed: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
        };
        assert!(error.to_string().ends_with("a.txt, b.txt"));
    }
}
