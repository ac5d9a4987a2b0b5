//! Per-turn checkpoints.
//!
//! A checkpoint is opened the first time a turn is about to mutate a file.
//! Each path's original bytes are copied into the checkpoint exactly once,
//! before its first write; paths that did not exist are recorded as created
//! instead. The checkpoint then either commits (kept for explicit undo until
//! retention evicts it) or rolls back (originals restored, created paths
//! deleted).
//!
//! On disk each checkpoint is a directory under the store:
//!
//! ```text
//! <store>/<id>/metadata.json
//! <store>/<id>/files/<n>.snap
//! ```
//!
//! `<store>/rolled_back.json` lists ids that were already rolled back, so an
//! undo repeated after a restart is still a no-op.
//!
//! `metadata.json` is only written at commit, so a directory without it is
//! the remains of a turn that never finished and is removed at startup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic_write::write_atomic;
use crate::error_handling::CheckpointError;
use crate::paths::{
    checkpoint_dir, project_relative, rolled_back_record, snapshot_file,
    CHECKPOINT_METADATA_FILE, SNAPSHOT_DIR,
};

/// Rolled-back ids remembered across restarts.
const ROLLED_BACK_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckpointState::Open => "open",
            CheckpointState::Committed => "committed",
            CheckpointState::RolledBack => "rolled back",
        })
    }
}

/// Undo record for one turn.
///
/// A path is in at most one of `snapshots` and `created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub turn: u64,
    pub created_at: DateTime<Utc>,
    pub state: CheckpointState,
    /// Project-relative path to the name of its snapshot under `files/`
    pub snapshots: BTreeMap<PathBuf, String>,
    /// Project-relative paths that did not exist before the turn
    pub created: BTreeSet<PathBuf>,
    /// Directories the turn created, outermost first
    pub created_dirs: Vec<PathBuf>,
}

impl Checkpoint {
    fn new(id: String, turn: u64) -> Self {
        Self {
            id,
            turn,
            created_at: Utc::now(),
            state: CheckpointState::Open,
            snapshots: BTreeMap::new(),
            created: BTreeSet::new(),
            created_dirs: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.created.is_empty() && self.created_dirs.is_empty()
    }

    /// Every file the turn touched, modified ones first.
    pub fn touched_paths(&self) -> impl Iterator<Item = &Path> {
        self.snapshots
            .keys()
            .chain(self.created.iter())
            .map(PathBuf::as_path)
    }

    pub fn file_count(&self) -> usize {
        self.snapshots.len() + self.created.len()
    }
}

/// Owns every checkpoint of one project.
///
/// At most one checkpoint is open at a time; a new turn cannot start mutating
/// until the previous checkpoint is committed or rolled back.
#[derive(Debug)]
pub struct CheckpointManager {
    root: PathBuf,
    store: PathBuf,
    retention: usize,
    /// Oldest first
    committed: Vec<Checkpoint>,
    open: Option<Checkpoint>,
    /// Ids already rolled back, so repeating a rollback is a no-op. Persisted
    /// in the store and capped at [`ROLLED_BACK_HISTORY`] newest ids.
    rolled_back: BTreeSet<String>,
    next_sequence: u64,
}

impl CheckpointManager {
    /// Load the store at `store`, removing anything incomplete or corrupt.
    pub fn new(
        root: impl Into<PathBuf>,
        store: impl Into<PathBuf>,
        retention: usize,
    ) -> Result<Self, CheckpointError> {
        let root = root.into();
        let store = store.into();
        fs::create_dir_all(&store).map_err(|e| CheckpointError::io(&store, e))?;

        let mut manager = Self {
            root,
            store,
            retention: retention.max(1),
            committed: Vec::new(),
            open: None,
            rolled_back: BTreeSet::new(),
            next_sequence: 0,
        };
        manager.rolled_back = manager.load_rolled_back();
        manager.committed = manager.heal()?;
        manager.evict_to(manager.retention);

        debug!(
            "Checkpoint store {:?} loaded with {} committed checkpoint(s)",
            manager.store,
            manager.committed.len()
        );
        Ok(manager)
    }

    pub fn store_dir(&self) -> &Path {
        &self.store
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// The open checkpoint, if a turn is mutating files right now.
    pub fn current(&self) -> Option<&Checkpoint> {
        self.open.as_ref()
    }

    /// All known checkpoints, newest first.
    pub fn list_checkpoints(&self) -> Vec<Checkpoint> {
        self.open
            .iter()
            .chain(self.committed.iter().rev())
            .cloned()
            .collect()
    }

    /// Open a checkpoint for `turn`, or return the one already open for it.
    pub fn open(&mut self, turn: u64) -> Result<String, CheckpointError> {
        if let Some(open) = &self.open {
            if open.turn == turn {
                return Ok(open.id.clone());
            }
            return Err(CheckpointError::TurnInProgress {
                open_id: open.id.clone(),
                turn: open.turn,
            });
        }

        let id = self.next_id();
        let files = checkpoint_dir(&self.store, &id).join(SNAPSHOT_DIR);
        fs::create_dir_all(&files).map_err(|e| CheckpointError::io(&files, e))?;

        debug!("Opened checkpoint {} for turn {}", id, turn);
        self.open = Some(Checkpoint::new(id.clone(), turn));
        Ok(id)
    }

    /// Record the state of `rel` before the open checkpoint's turn first
    /// writes it. Later calls for the same path do nothing.
    pub fn capture(&mut self, rel: &Path) -> Result<(), CheckpointError> {
        let open = self.open.as_mut().ok_or(CheckpointError::NoOpenCheckpoint)?;
        if open.snapshots.contains_key(rel) || open.created.contains(rel) {
            return Ok(());
        }

        let target = self.root.join(rel);
        match fs::read(&target) {
            Ok(bytes) => {
                let name = format!("{}.snap", open.snapshots.len());
                let snapshot_path = snapshot_file(&self.store, &open.id, &name);
                write_atomic(&snapshot_path, &bytes)
                    .map_err(|e| CheckpointError::io(&snapshot_path, e))?;
                debug!("Snapshotted {:?} ({} bytes) as {}", rel, bytes.len(), name);
                open.snapshots.insert(rel.to_path_buf(), name);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Recording {:?} as created", rel);
                open.created.insert(rel.to_path_buf());
            }
            Err(e) => return Err(CheckpointError::io(&target, e)),
        }
        Ok(())
    }

    /// Record project-relative directories the open turn is about to create.
    pub fn record_created_dirs(&mut self, dirs: Vec<PathBuf>) -> Result<(), CheckpointError> {
        let open = self.open.as_mut().ok_or(CheckpointError::NoOpenCheckpoint)?;
        for dir in dirs {
            if !open.created_dirs.contains(&dir) {
                open.created_dirs.push(dir);
            }
        }
        Ok(())
    }

    /// Close the open checkpoint as committed.
    ///
    /// Returns the committed id, or `None` when nothing was open or the
    /// checkpoint recorded no changes (it is discarded).
    pub fn commit(&mut self) -> Result<Option<String>, CheckpointError> {
        let Some(mut checkpoint) = self.open.take() else {
            return Ok(None);
        };

        if checkpoint.is_empty() {
            debug!("Discarding empty checkpoint {}", checkpoint.id);
            self.remove_checkpoint_dir(&checkpoint.id);
            return Ok(None);
        }

        self.evict_to(self.retention - 1);

        checkpoint.state = CheckpointState::Committed;
        if let Err(e) = self.persist_metadata(&checkpoint) {
            checkpoint.state = CheckpointState::Open;
            self.open = Some(checkpoint);
            return Err(e);
        }

        info!(
            "Committed checkpoint {} for turn {} ({} file(s))",
            checkpoint.id,
            checkpoint.turn,
            checkpoint.file_count()
        );
        let id = checkpoint.id.clone();
        self.committed.push(checkpoint);
        Ok(Some(id))
    }

    /// Roll back the open checkpoint, if any.
    pub fn rollback_open(&mut self) -> Result<Option<String>, CheckpointError> {
        let Some(mut checkpoint) = self.open.take() else {
            return Ok(None);
        };

        let failed = self.restore(&checkpoint);
        checkpoint.state = CheckpointState::RolledBack;
        self.mark_rolled_back(&checkpoint.id);

        if !failed.is_empty() {
            warn!(
                "Checkpoint {} only partially rolled back; snapshots kept in {:?}",
                checkpoint.id,
                checkpoint_dir(&self.store, &checkpoint.id)
            );
            return Err(CheckpointError::RestoreIncomplete {
                id: checkpoint.id,
                failed,
            });
        }

        self.remove_checkpoint_dir(&checkpoint.id);
        info!("Rolled back checkpoint {} of turn {}", checkpoint.id, checkpoint.turn);
        Ok(Some(checkpoint.id))
    }

    /// Roll back the open checkpoint only if it belongs to `turn`.
    pub fn rollback_open_for_turn(&mut self, turn: u64) -> Result<Option<String>, CheckpointError> {
        match &self.open {
            Some(checkpoint) if checkpoint.turn == turn => self.rollback_open(),
            _ => Ok(None),
        }
    }

    /// Undo checkpoint `id`.
    ///
    /// An open checkpoint is rolled back. A committed one is undone together
    /// with every newer committed checkpoint, newest first, and all of them
    /// leave the store. Returns the ids undone; empty when `id` was already
    /// rolled back.
    pub fn rollback(&mut self, id: &str) -> Result<Vec<String>, CheckpointError> {
        if self.open.as_ref().is_some_and(|cp| cp.id == id) {
            return Ok(self.rollback_open()?.into_iter().collect());
        }
        if self.rolled_back.contains(id) {
            debug!("Checkpoint {} already rolled back", id);
            return Ok(Vec::new());
        }

        let position = self
            .committed
            .iter()
            .position(|cp| cp.id == id)
            .ok_or_else(|| CheckpointError::NotFound { id: id.to_string() })?;

        if let Some(open) = &self.open {
            return Err(CheckpointError::TurnInProgress {
                open_id: open.id.clone(),
                turn: open.turn,
            });
        }

        let mut undone = Vec::new();
        let mut failed = Vec::new();
        while self.committed.len() > position {
            let Some(mut checkpoint) = self.committed.pop() else {
                break;
            };
            let failures = self.restore(&checkpoint);
            checkpoint.state = CheckpointState::RolledBack;
            if failures.is_empty() {
                self.remove_checkpoint_dir(&checkpoint.id);
            } else if let Err(e) = self.persist_metadata(&checkpoint) {
                // Left behind without valid committed metadata, it is healed away later
                warn!("Failed to mark checkpoint {} rolled back: {}", checkpoint.id, e);
            }
            info!("Undid checkpoint {} of turn {}", checkpoint.id, checkpoint.turn);
            self.mark_rolled_back(&checkpoint.id);
            undone.push(checkpoint.id);
            failed.extend(failures);
        }

        if !failed.is_empty() {
            return Err(CheckpointError::RestoreIncomplete {
                id: id.to_string(),
                failed,
            });
        }
        Ok(undone)
    }

    /// Undo the newest committed checkpoint.
    pub fn undo_last(&mut self) -> Result<Vec<String>, CheckpointError> {
        let id = self
            .committed
            .last()
            .map(|cp| cp.id.clone())
            .ok_or(CheckpointError::NothingToUndo)?;
        self.rollback(&id)
    }

    /// Put every snapshot back and delete every created path. Returns the
    /// paths that could not be restored.
    fn restore(&self, checkpoint: &Checkpoint) -> Vec<PathBuf> {
        let mut failed = Vec::new();

        for (rel, snapshot) in &checkpoint.snapshots {
            let source = snapshot_file(&self.store, &checkpoint.id, snapshot);
            let target = self.root.join(rel);
            if let Err(e) = fs::read(&source).and_then(|bytes| write_atomic(&target, &bytes)) {
                warn!(
                    "Failed to restore {:?} from checkpoint {}: {}",
                    target, checkpoint.id, e
                );
                failed.push(rel.clone());
            }
        }

        for rel in &checkpoint.created {
            let target = self.root.join(rel);
            match fs::remove_file(&target) {
                Ok(()) => debug!("Removed created file {:?}", target),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove created file {:?}: {}", target, e);
                    failed.push(rel.clone());
                }
            }
        }

        for rel in checkpoint.created_dirs.iter().rev() {
            let dir = self.root.join(rel);
            // Non-empty directories hold files someone else put there
            if let Err(e) = fs::remove_dir(&dir) {
                debug!("Keeping directory {:?}: {}", dir, e);
            }
        }

        failed
    }

    fn load_rolled_back(&self) -> BTreeSet<String> {
        let path = rolled_back_record(&self.store);
        match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable rollback record {:?}: {}", path, e);
                BTreeSet::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!("Failed to read rollback record {:?}: {}", path, e);
                BTreeSet::new()
            }
        }
    }

    fn mark_rolled_back(&mut self, id: &str) {
        self.rolled_back.insert(id.to_string());
        // Ids start with their timestamp, so the first ones are the oldest
        while self.rolled_back.len() > ROLLED_BACK_HISTORY {
            self.rolled_back.pop_first();
        }

        let path = rolled_back_record(&self.store);
        let written = serde_json::to_vec(&self.rolled_back)
            .map_err(CheckpointError::from)
            .and_then(|record| write_atomic(&path, &record).map_err(|e| CheckpointError::io(&path, e)));
        if let Err(e) = written {
            warn!("Failed to record rollback of {}: {}", id, e);
        }
    }

    fn persist_metadata(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let metadata = serde_json::to_vec_pretty(checkpoint)?;
        let path = checkpoint_dir(&self.store, &checkpoint.id).join(CHECKPOINT_METADATA_FILE);
        write_atomic(&path, &metadata).map_err(|e| CheckpointError::io(&path, e))
    }

    /// Evict the oldest committed checkpoints until at most `keep` remain.
    fn evict_to(&mut self, keep: usize) {
        while self.committed.len() > keep {
            let oldest = self.committed.remove(0);
            info!("Evicting checkpoint {} (retention {})", oldest.id, self.retention);
            self.remove_checkpoint_dir(&oldest.id);
        }
    }

    fn remove_checkpoint_dir(&self, id: &str) {
        let dir = checkpoint_dir(&self.store, id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove checkpoint directory {:?}: {}", dir, e);
            }
        }
    }

    fn next_id(&mut self) -> String {
        loop {
            self.next_sequence += 1;
            let id = format!(
                "{}-{:04}",
                Utc::now().format("%Y%m%d_%H%M%S_%6f"),
                self.next_sequence
            );
            if !checkpoint_dir(&self.store, &id).exists() {
                return id;
            }
        }
    }

    /// Scan the store and keep only complete committed checkpoints, oldest first.
    fn heal(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut kept = Vec::new();
        let entries = fs::read_dir(&self.store).map_err(|e| CheckpointError::io(&self.store, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::io(&self.store, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let id = entry.file_name().to_string_lossy().into_owned();
            match self.validate_persisted(&id) {
                Ok(checkpoint) => kept.push(checkpoint),
                Err(reason) => {
                    let error = CheckpointError::Corrupt { id, reason };
                    warn!("Removing checkpoint during self-heal: {}", error);
                    if let Err(e) = fs::remove_dir_all(&path) {
                        warn!("Failed to remove {:?}: {}", path, e);
                    }
                }
            }
        }

        kept.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(kept)
    }

    fn validate_persisted(&self, id: &str) -> Result<Checkpoint, String> {
        let metadata_path = checkpoint_dir(&self.store, id).join(CHECKPOINT_METADATA_FILE);
        let raw = fs::read_to_string(&metadata_path)
            .map_err(|e| format!("metadata unreadable: {}", e))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&raw).map_err(|e| format!("metadata invalid: {}", e))?;

        if checkpoint.id != id {
            return Err(format!("metadata names checkpoint {}", checkpoint.id));
        }
        if checkpoint.state != CheckpointState::Committed {
            return Err(format!("left {}", checkpoint.state));
        }
        for rel in checkpoint
            .touched_paths()
            .chain(checkpoint.created_dirs.iter().map(PathBuf::as_path))
        {
            if project_relative(&self.root, rel).as_deref() != Ok(rel) {
                return Err(format!("path {:?} is outside the project", rel));
            }
        }
        for (rel, snapshot) in &checkpoint.snapshots {
            if !snapshot_file(&self.store, id, snapshot).is_file() {
                return Err(format!("snapshot {} of {:?} is missing", snapshot, rel));
            }
        }
        Ok(checkpoint)
    }
}
