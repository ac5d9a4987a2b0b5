//! Checkpoint store behaviour through the public engine API.

use std::fs;
use std::path::Path;

use sc_core::paths::CHECKPOINT_METADATA_FILE;
use sc_core::{CheckpointError, CheckpointManager, CheckpointState, EditEngine, ToolCall, ToolCallFormat};
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

fn store(root: &Path) -> std::path::PathBuf {
    root.join(".supercoder/checkpoints")
}

fn engine(root: &Path, retention: usize) -> EditEngine {
    EditEngine::new(root, store(root), retention).unwrap()
}

/// Apply one create per turn and commit it.
fn commit_turns(engine: &mut EditEngine, turns: std::ops::RangeInclusive<u64>) -> Vec<String> {
    turns
        .map(|turn| {
            let outcome = engine.apply(
                turn,
                &call("create", json!({"path": format!("file{}.txt", turn), "content": "x"})),
            );
            assert!(outcome.is_applied(), "{}", outcome.to_tool_result());
            engine.commit_turn(turn).unwrap().unwrap()
        })
        .collect()
}

#[test]
fn test_rollback_restores_every_prefix_of_operations() {
    let operations = vec![
        call("search_replace", json!({"path": "a.txt", "search": "alpha", "replace": "ALPHA"})),
        call("create", json!({"path": "new/b.txt", "content": "brand new"})),
        call("insert_after", json!({"path": "a.txt", "anchor": "ALPHA", "content": "after"})),
        call("replace_lines", json!({"path": "c.txt", "start": 1, "end": 2, "content": "gone"})),
        call("create", json!({"path": "c.txt", "content": "overwritten", "overwrite": true})),
    ];

    for applied in 0..=operations.len() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "alpha\nbeta\n").unwrap();
        fs::write(root.join("c.txt"), b"one\ntwo\n\xff binary tail").unwrap();
        let before_a = fs::read(root.join("a.txt")).unwrap();
        let before_c = fs::read(root.join("c.txt")).unwrap();

        let mut engine = engine(root, 10);
        for operation in &operations[..applied] {
            let outcome = engine.apply(1, operation);
            // c.txt is not UTF-8, so the line edit on it fails; that is fine
            if operation.tool != "replace_lines" {
                assert!(outcome.is_applied(), "{}", outcome.to_tool_result());
            }
        }

        engine.rollback_turn(1).unwrap();

        assert_eq!(fs::read(root.join("a.txt")).unwrap(), before_a, "after {} ops", applied);
        assert_eq!(fs::read(root.join("c.txt")).unwrap(), before_c, "after {} ops", applied);
        assert!(!root.join("new").exists(), "after {} ops", applied);
        assert!(engine.list_checkpoints().is_empty());
    }
}

#[test]
fn test_rollback_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("a.txt"), "original").unwrap();

    let mut checkpoints = CheckpointManager::new(root, store(root), 10).unwrap();
    let id = checkpoints.open(1).unwrap();
    checkpoints.capture(Path::new("a.txt")).unwrap();
    fs::write(root.join("a.txt"), "changed").unwrap();

    assert_eq!(checkpoints.rollback(&id).unwrap(), vec![id.clone()]);
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "original");

    // Someone edits the file after the rollback; a repeated rollback must not touch it
    fs::write(root.join("a.txt"), "later").unwrap();
    assert!(checkpoints.rollback(&id).unwrap().is_empty());
    assert!(checkpoints.rollback_open().unwrap().is_none());
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "later");
}

#[test]
fn test_rollback_stays_a_no_op_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    let id = {
        let mut engine = engine(root, 10);
        let ids = commit_turns(&mut engine, 1..=1);
        assert_eq!(engine.undo_last().unwrap(), ids);
        ids[0].clone()
    };
    assert!(!root.join("file1.txt").exists());

    // Same file name recreated by hand after the undo
    fs::write(root.join("file1.txt"), "mine").unwrap();

    let mut engine = engine(root, 10);
    assert!(engine.rollback(&id).unwrap().is_empty());
    assert_eq!(fs::read_to_string(root.join("file1.txt")).unwrap(), "mine");
    assert!(engine.list_checkpoints().is_empty());
    assert!(matches!(
        engine.rollback("20240101_000000_000000-0042"),
        Err(CheckpointError::NotFound { .. })
    ));
}

#[test]
fn test_retention_evicts_exactly_the_oldest() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut engine = engine(root, 10);

    let ids = commit_turns(&mut engine, 1..=10);
    assert_eq!(engine.list_checkpoints().len(), 10);

    let eleventh = commit_turns(&mut engine, 11..=11);
    let listed: Vec<String> = engine.list_checkpoints().into_iter().map(|c| c.id).collect();

    assert_eq!(listed.len(), 10);
    assert_eq!(listed[0], eleventh[0]);
    assert!(!listed.contains(&ids[0]));
    assert!(!store(root).join(&ids[0]).exists());
    for id in &ids[1..] {
        assert!(listed.contains(id));
    }
}

#[test]
fn test_startup_heals_corrupt_checkpoints() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("a.txt"), "a").unwrap();

    let good = {
        let mut engine = engine(root, 10);
        engine.apply(1, &call("search_replace", json!({"path": "a.txt", "search": "a", "replace": "b"})));
        engine.commit_turn(1).unwrap().unwrap()
    };

    // Left open by a crash: no metadata
    fs::create_dir_all(store(root).join("20240101_000000_000000-0001/files")).unwrap();
    // Unparsable metadata
    fs::create_dir_all(store(root).join("garbage")).unwrap();
    fs::write(store(root).join("garbage").join(CHECKPOINT_METADATA_FILE), "{not json").unwrap();
    // Committed metadata pointing at a snapshot that is gone
    let broken = store(root).join("broken");
    fs::create_dir_all(&broken).unwrap();
    let mut metadata: Value = serde_json::from_str(
        &fs::read_to_string(store(root).join(&good).join(CHECKPOINT_METADATA_FILE)).unwrap(),
    )
    .unwrap();
    metadata["id"] = json!("broken");
    fs::write(broken.join(CHECKPOINT_METADATA_FILE), metadata.to_string()).unwrap();

    let engine = engine(root, 10);

    let listed: Vec<String> = engine.list_checkpoints().into_iter().map(|c| c.id).collect();
    assert_eq!(listed, vec![good.clone()]);
    assert!(!store(root).join("20240101_000000_000000-0001").exists());
    assert!(!store(root).join("garbage").exists());
    assert!(!broken.exists());
    assert!(store(root).join(&good).exists());
}

#[test]
fn test_committed_checkpoints_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    let ids = {
        let mut engine = engine(root, 10);
        commit_turns(&mut engine, 1..=3)
    };

    let mut engine = engine(root, 10);
    let listed = engine.list_checkpoints();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|c| c.state == CheckpointState::Committed));
    assert_eq!(listed[0].id, ids[2]);

    assert_eq!(engine.undo_last().unwrap(), vec![ids[2].clone()]);
    assert!(!root.join("file3.txt").exists());
    assert!(root.join("file2.txt").exists());
}

#[test]
fn test_undo_of_older_checkpoint_undoes_newer_ones_first() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("log.txt"), "v0\n").unwrap();
    let mut engine = engine(root, 10);

    let mut ids = Vec::new();
    for turn in 1..=3u64 {
        let outcome = engine.apply(
            turn,
            &call(
                "search_replace",
                json!({"path": "log.txt", "search": format!("v{}", turn - 1), "replace": format!("v{}", turn)}),
            ),
        );
        assert!(outcome.is_applied());
        ids.push(engine.commit_turn(turn).unwrap().unwrap());
    }
    assert_eq!(fs::read_to_string(root.join("log.txt")).unwrap(), "v3\n");

    let undone = engine.rollback(&ids[1]).unwrap();

    assert_eq!(undone, vec![ids[2].clone(), ids[1].clone()]);
    assert_eq!(fs::read_to_string(root.join("log.txt")).unwrap(), "v1\n");
    let listed: Vec<String> = engine.list_checkpoints().into_iter().map(|c| c.id).collect();
    assert_eq!(listed, vec![ids[0].clone()]);
}

#[test]
fn test_undo_errors() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut engine = engine(root, 10);

    assert!(matches!(engine.undo_last(), Err(CheckpointError::NothingToUndo)));
    assert!(matches!(
        engine.rollback("no-such-id"),
        Err(CheckpointError::NotFound { .. })
    ));

    let ids = commit_turns(&mut engine, 1..=1);
    engine.apply(2, &call("create", json!({"path": "open.txt", "content": ""})));
    assert!(matches!(
        engine.rollback(&ids[0]),
        Err(CheckpointError::TurnInProgress { turn: 2, .. })
    ));
}

#[test]
fn test_second_turn_cannot_mutate_while_first_is_open() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut engine = engine(root, 10);

    assert!(engine
        .apply(1, &call("create", json!({"path": "one.txt", "content": ""})))
        .is_applied());
    let blocked = engine.apply(2, &call("create", json!({"path": "two.txt", "content": ""})));

    assert_eq!(blocked.result.unwrap_err().class(), "CheckpointError");
    assert!(!root.join("two.txt").exists());
}
