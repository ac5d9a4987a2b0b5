//! Applies edit operations to the project, one at a time, under a checkpoint.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sc_config::CheckpointConfig;
use tracing::{debug, info};

use crate::atomic_write::write_atomic;
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::edit_ops::{EditOperation, FileView, OperationKind};
use crate::error_handling::{CheckpointError, EditError};
use crate::paths::{checkpoint_store_dir, missing_ancestors, project_relative};
use crate::ToolCall;

/// Result of applying one tool call.
#[derive(Debug)]
pub struct OperationOutcome {
    pub tool: String,
    pub kind: Option<OperationKind>,
    /// Project-relative target, once known
    pub path: Option<PathBuf>,
    pub result: Result<String, EditError>,
}

impl OperationOutcome {
    pub fn is_applied(&self) -> bool {
        self.result.is_ok()
    }

    pub(crate) fn interrupted(call: &ToolCall) -> Self {
        Self {
            tool: call.tool.clone(),
            kind: None,
            path: None,
            result: Err(EditError::Interrupted),
        }
    }

    /// The text handed back to the model for this call.
    pub fn to_tool_result(&self) -> String {
        match &self.result {
            Ok(summary) => summary.clone(),
            Err(e) => e.to_tool_result(),
        }
    }
}

/// Owns the project root and its checkpoint store.
///
/// Later operations of a turn read the files as earlier ones left them, since
/// every apply writes through before the next one is planned.
#[derive(Debug)]
pub struct EditEngine {
    root: PathBuf,
    checkpoints: CheckpointManager,
}

impl EditEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        store: impl Into<PathBuf>,
        retention: usize,
    ) -> Result<Self, CheckpointError> {
        let root = root.into();
        let checkpoints = CheckpointManager::new(root.clone(), store, retention)?;
        Ok(Self { root, checkpoints })
    }

    pub fn from_config(root: &Path, config: &CheckpointConfig) -> Result<Self, CheckpointError> {
        Self::new(
            root,
            checkpoint_store_dir(root, &config.directory),
            config.retention,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Resolve and apply one tool call for `turn`. Failures are returned in the
    /// outcome; they never affect operations that already ran.
    pub fn apply(&mut self, turn: u64, call: &ToolCall) -> OperationOutcome {
        let mut outcome = OperationOutcome {
            tool: call.tool.clone(),
            kind: None,
            path: None,
            result: Ok(String::new()),
        };
        let result = self.try_apply(turn, call, &mut outcome);
        outcome.result = result;

        match &outcome.result {
            Ok(summary) => info!("Turn {}: {}", turn, summary),
            Err(e) => debug!("Turn {}: {} failed: {}", turn, call.tool, e),
        }
        outcome
    }

    fn try_apply(
        &mut self,
        turn: u64,
        call: &ToolCall,
        outcome: &mut OperationOutcome,
    ) -> Result<String, EditError> {
        let mut operation = EditOperation::resolve(call)?;
        outcome.kind = Some(operation.kind());

        let rel = self.project_path(operation.kind(), operation.path())?;
        operation.set_path(rel.clone());
        outcome.path = Some(rel.clone());

        let mutation = operation.plan(&*self)?;

        self.checkpoints.open(turn)?;
        self.checkpoints.capture(&rel)?;

        let target = self.root.join(&rel);
        let new_dirs: Vec<PathBuf> = missing_ancestors(&self.root, &target)
            .into_iter()
            .filter_map(|dir| dir.strip_prefix(&self.root).ok().map(Path::to_path_buf))
            .collect();
        if !new_dirs.is_empty() {
            self.checkpoints.record_created_dirs(new_dirs)?;
        }

        write_atomic(&target, mutation.new_content.as_bytes())
            .map_err(|e| EditError::io("write", &rel, e))?;
        Ok(mutation.summary)
    }

    fn project_path(&self, kind: OperationKind, raw: &Path) -> Result<PathBuf, EditError> {
        let rel = project_relative(&self.root, raw)
            .map_err(|reason| EditError::validation(kind.as_str(), format!("{}: {}", reason, raw.display())))?;

        if let Ok(store) = self.checkpoints.store_dir().strip_prefix(&self.root) {
            if rel.starts_with(store) {
                return Err(EditError::validation(
                    kind.as_str(),
                    format!("{} is inside the checkpoint store", rel.display()),
                ));
            }
        }
        Ok(rel)
    }

    /// Commit the open checkpoint if it belongs to `turn`.
    pub fn commit_turn(&mut self, turn: u64) -> Result<Option<String>, CheckpointError> {
        match self.checkpoints.current() {
            Some(checkpoint) if checkpoint.turn == turn => self.checkpoints.commit(),
            _ => Ok(None),
        }
    }

    /// Roll back the open checkpoint if it belongs to `turn`.
    pub fn rollback_turn(&mut self, turn: u64) -> Result<Option<String>, CheckpointError> {
        self.checkpoints.rollback_open_for_turn(turn)
    }

    pub fn list_checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.list_checkpoints()
    }

    pub fn rollback(&mut self, id: &str) -> Result<Vec<String>, CheckpointError> {
        self.checkpoints.rollback(id)
    }

    pub fn undo_last(&mut self) -> Result<Vec<String>, CheckpointError> {
        self.checkpoints.undo_last()
    }
}

impl FileView for EditEngine {
    fn read(&self, path: &Path) -> Result<Option<String>, EditError> {
        match fs::read_to_string(self.root.join(path)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EditError::io("read", path, e)),
        }
    }

    fn exists(&self, path: &Path) -> Result<bool, EditError> {
        match fs::symlink_metadata(self.root.join(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EditError::io("inspect", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCallFormat;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn call(tool: &str, args: Value) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
            span: 0..0,
            format: ToolCallFormat::Supercoder,
        }
    }

    fn engine(root: &Path) -> EditEngine {
        EditEngine::new(root, root.join(".supercoder/checkpoints"), 10).unwrap()
    }

    #[test]
    fn test_failed_plan_does_not_open_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(temp_dir.path());

        let outcome = engine.apply(
            1,
            &call("search_replace", json!({"path": "missing.txt", "search": "a", "replace": "b"})),
        );

        assert!(!outcome.is_applied());
        assert!(engine.checkpoints().current().is_none());
    }

    #[test]
    fn test_path_escape_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(temp_dir.path());

        let outcome = engine.apply(1, &call("create", json!({"path": "../evil.txt", "content": "x"})));

        assert_eq!(outcome.result.unwrap_err().class(), "ValidationError");
        assert!(!temp_dir.path().parent().unwrap().join("evil.txt").exists());
    }

    #[test]
    fn test_checkpoint_store_is_off_limits() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(temp_dir.path());

        let outcome = engine.apply(
            1,
            &call("create", json!({"path": ".supercoder/checkpoints/x/metadata.json", "content": "{}"})),
        );

        assert!(outcome.to_tool_result().contains("checkpoint store"));
    }

    #[test]
    fn test_created_directories_are_removed_on_rollback() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut engine = engine(root);

        let outcome = engine.apply(1, &call("create", json!({"path": "src/deep/mod.rs", "content": "x"})));
        assert!(outcome.is_applied(), "{}", outcome.to_tool_result());
        assert_eq!(outcome.path.as_deref(), Some(Path::new("src/deep/mod.rs")));

        engine.rollback_turn(1).unwrap();
        assert!(!root.join("src").exists());
    }

    #[test]
    fn test_commit_ignores_other_turns() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(temp_dir.path());

        engine.apply(2, &call("create", json!({"path": "a.txt", "content": "x"})));
        assert_eq!(engine.commit_turn(1).unwrap(), None);
        assert!(engine.commit_turn(2).unwrap().is_some());
    }
}
