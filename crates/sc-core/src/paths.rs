//! Path utilities for project-relative edits and the checkpoint store.
//!
//! This module centralizes all path-related logic for:
//! - Resolving model-supplied paths against the project root
//! - Checkpoint directory layout
//! - Finding directories a write would have to create

use std::path::{Component, Path, PathBuf};

/// File holding a checkpoint's metadata record.
pub const CHECKPOINT_METADATA_FILE: &str = "metadata.json";

/// Sub-directory of a checkpoint holding original-byte copies.
pub const SNAPSHOT_DIR: &str = "files";

/// File in the store listing ids that were already rolled back.
pub const ROLLED_BACK_FILE: &str = "rolled_back.json";

/// Why a model-supplied path was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRejection {
    Empty,
    OutsideRoot,
}

impl std::fmt::Display for PathRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathRejection::Empty => f.write_str("path is empty"),
            PathRejection::OutsideRoot => f.write_str("path escapes the project root"),
        }
    }
}

/// Turn `raw` into a normalized path relative to `root`.
///
/// Absolute paths are accepted only when they point inside `root`. `..` is
/// resolved lexically and may not climb above the root.
pub fn project_relative(root: &Path, raw: &Path) -> Result<PathBuf, PathRejection> {
    let relative = if raw.is_absolute() {
        raw.strip_prefix(root)
            .map_err(|_| PathRejection::OutsideRoot)?
            .to_path_buf()
    } else {
        raw.to_path_buf()
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(PathRejection::OutsideRoot);
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(PathRejection::OutsideRoot),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(PathRejection::Empty);
    }
    Ok(normalized)
}

/// Get the checkpoint store directory for a project.
pub fn checkpoint_store_dir(root: &Path, configured: &str) -> PathBuf {
    root.join(configured)
}

/// Record of rolled-back checkpoint ids, kept across restarts.
pub fn rolled_back_record(store: &Path) -> PathBuf {
    store.join(ROLLED_BACK_FILE)
}

/// Directory holding one checkpoint's metadata and snapshots.
pub fn checkpoint_dir(store: &Path, id: &str) -> PathBuf {
    store.join(id)
}

/// Path of one snapshot file inside a checkpoint.
pub fn snapshot_file(store: &Path, id: &str, snapshot: &str) -> PathBuf {
    checkpoint_dir(store, id).join(SNAPSHOT_DIR).join(snapshot)
}

/// Ancestors of `path` below `root` that do not exist yet, outermost first.
pub fn missing_ancestors(root: &Path, path: &Path) -> Vec<PathBuf> {
    let mut missing: Vec<PathBuf> = path
        .ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(root) && *dir != root && !dir.exists())
        .map(Path::to_path_buf)
        .collect();
    missing.reverse();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_is_normalized() {
        let root = Path::new("/work/project");
        assert_eq!(
            project_relative(root, Path::new("./src/../src/main.rs")).unwrap(),
            PathBuf::from("src/main.rs")
        );
    }

    #[test]
    fn test_absolute_path_inside_root() {
        let root = Path::new("/work/project");
        assert_eq!(
            project_relative(root, Path::new("/work/project/a.txt")).unwrap(),
            PathBuf::from("a.txt")
        );
    }

    #[test]
    fn test_escapes_are_rejected() {
        let root = Path::new("/work/project");
        assert_eq!(
            project_relative(root, Path::new("../secrets")),
            Err(PathRejection::OutsideRoot)
        );
        assert_eq!(
            project_relative(root, Path::new("/etc/passwd")),
            Err(PathRejection::OutsideRoot)
        );
        assert_eq!(project_relative(root, Path::new("./")), Err(PathRejection::Empty));
    }

    #[test]
    fn test_missing_ancestors_outermost_first() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir(root.join("a")).unwrap();

        let missing = missing_ancestors(root, &root.join("a/b/c/file.txt"));
        assert_eq!(missing, vec![root.join("a/b"), root.join("a/b/c")]);
        assert!(missing_ancestors(root, &root.join("top.txt")).is_empty());
    }
}
