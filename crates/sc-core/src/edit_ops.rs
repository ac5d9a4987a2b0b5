//! Edit operations: turning a decoded tool call into a typed operation, and
//! computing what that operation does to the current file contents.
//!
//! Resolution only checks the call's shape. Whether the operation applies
//! (search text present exactly once, line range valid, file absent for a
//! create) is decided by [`EditOperation::plan`] against the file state the
//! engine hands it, which already reflects earlier edits of the same turn.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error_handling::EditError;
use crate::ToolCall;

/// Umbrella tool names that carry the kind in an `operation` argument.
const UMBRELLA_TOOLS: &[&str] = &["code-edit", "code_edit"];

const PATH_KEYS: &[&str] = &["path", "filepath", "file_path", "fileName"];
const START_KEYS: &[&str] = &["start", "startLine", "start_line"];
const END_KEYS: &[&str] = &["end", "endLine", "end_line"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SearchReplace,
    InsertAfter,
    InsertBefore,
    ReplaceLines,
    Create,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SearchReplace => "search_replace",
            OperationKind::InsertAfter => "insert_after",
            OperationKind::InsertBefore => "insert_before",
            OperationKind::ReplaceLines => "replace_lines",
            OperationKind::Create => "create",
        }
    }

    /// Accepts `insert_after`, `insert-after`, `Insert_After`, ...
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "search_replace" => Some(OperationKind::SearchReplace),
            "insert_after" => Some(OperationKind::InsertAfter),
            "insert_before" => Some(OperationKind::InsertBefore),
            "replace_lines" => Some(OperationKind::ReplaceLines),
            "create" => Some(OperationKind::Create),
            _ => None,
        }
    }

    fn anchor_keys(&self) -> &'static [&'static str] {
        match self {
            OperationKind::InsertBefore => &["anchor", "before"],
            _ => &["anchor", "after"],
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, typed edit. Line numbers are 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOperation {
    SearchReplace {
        path: PathBuf,
        search: String,
        replace: String,
    },
    InsertAfter {
        path: PathBuf,
        anchor: String,
        content: String,
    },
    InsertBefore {
        path: PathBuf,
        anchor: String,
        content: String,
    },
    ReplaceLines {
        path: PathBuf,
        start: i64,
        end: i64,
        content: String,
    },
    Create {
        path: PathBuf,
        content: String,
        overwrite: bool,
    },
}

/// Read access to the files an operation is planned against.
pub trait FileView {
    /// Current contents of `path`, or `None` if it does not exist.
    fn read(&self, path: &Path) -> Result<Option<String>, EditError>;

    fn exists(&self, path: &Path) -> Result<bool, EditError> {
        Ok(self.read(path)?.is_some())
    }
}

/// What applying an operation will do to its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMutation {
    pub path: PathBuf,
    pub new_content: String,
    /// Human-readable result for the tool transcript
    pub summary: String,
}

impl EditOperation {
    /// Map a tool call onto an edit operation.
    pub fn resolve(call: &ToolCall) -> Result<Self, EditError> {
        let (kind, umbrella) = if UMBRELLA_TOOLS.contains(&call.tool.as_str()) {
            let kind = match call.args.get("operation") {
                None => OperationKind::SearchReplace,
                Some(Value::String(name)) => OperationKind::from_name(name).ok_or_else(|| {
                    EditError::validation(&call.tool, format!("unknown operation '{}'", name))
                })?,
                Some(_) => {
                    return Err(EditError::validation(
                        &call.tool,
                        "argument 'operation' must be a string",
                    ))
                }
            };
            (kind, true)
        } else {
            let kind = OperationKind::from_name(&call.tool)
                .ok_or_else(|| EditError::validation(&call.tool, "unknown tool"))?;
            (kind, false)
        };

        let mut args = Arguments::new(kind, &call.args);
        if umbrella {
            args.mark_used("operation");
        }

        let path = PathBuf::from(args.required_string(PATH_KEYS)?);
        let operation = match kind {
            OperationKind::SearchReplace => {
                let search = args.required_string(&["search"])?;
                if search.is_empty() {
                    return Err(args.invalid("argument 'search' must not be empty"));
                }
                EditOperation::SearchReplace {
                    path,
                    search,
                    replace: args.required_string(&["replace"])?,
                }
            }
            OperationKind::InsertAfter | OperationKind::InsertBefore => {
                let anchor = args.required_string(kind.anchor_keys())?;
                if anchor.is_empty() {
                    return Err(args.invalid("anchor must not be empty"));
                }
                let content = args.required_string(&["content"])?;
                if kind == OperationKind::InsertAfter {
                    EditOperation::InsertAfter { path, anchor, content }
                } else {
                    EditOperation::InsertBefore { path, anchor, content }
                }
            }
            OperationKind::ReplaceLines => EditOperation::ReplaceLines {
                path,
                start: args.required_line(START_KEYS)?,
                end: args.required_line(END_KEYS)?,
                content: args.required_string(&["content"])?,
            },
            OperationKind::Create => EditOperation::Create {
                path,
                content: args.required_string(&["content"])?,
                overwrite: args.flag(&["overwrite"])?.unwrap_or(false),
            },
        };

        args.finish()?;
        Ok(operation)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            EditOperation::SearchReplace { .. } => OperationKind::SearchReplace,
            EditOperation::InsertAfter { .. } => OperationKind::InsertAfter,
            EditOperation::InsertBefore { .. } => OperationKind::InsertBefore,
            EditOperation::ReplaceLines { .. } => OperationKind::ReplaceLines,
            EditOperation::Create { .. } => OperationKind::Create,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            EditOperation::SearchReplace { path, .. }
            | EditOperation::InsertAfter { path, .. }
            | EditOperation::InsertBefore { path, .. }
            | EditOperation::ReplaceLines { path, .. }
            | EditOperation::Create { path, .. } => path,
        }
    }

    /// Replace the target path, used once it has been made project-relative.
    pub(crate) fn set_path(&mut self, new_path: PathBuf) {
        match self {
            EditOperation::SearchReplace { path, .. }
            | EditOperation::InsertAfter { path, .. }
            | EditOperation::InsertBefore { path, .. }
            | EditOperation::ReplaceLines { path, .. }
            | EditOperation::Create { path, .. } => *path = new_path,
        }
    }

    /// Compute the new contents of the target file. Nothing is written; a
    /// failed plan leaves the file untouched.
    pub fn plan(&self, view: &dyn FileView) -> Result<FileMutation, EditError> {
        let path = self.path().to_path_buf();

        let (new_content, summary) = match self {
            EditOperation::Create {
                content, overwrite, ..
            } => {
                let existed = view.exists(&path)?;
                if existed && !overwrite {
                    return Err(EditError::AlreadyExists { path });
                }
                let summary = format!(
                    "✅ {} {} ({} lines)",
                    if existed { "overwrote" } else { "created" },
                    path.display(),
                    content.lines().count()
                );
                (content.clone(), summary)
            }
            EditOperation::SearchReplace { search, replace, .. } => {
                let current = read_existing(view, &path)?;
                match count_occurrences(&current, search) {
                    0 => {
                        return Err(EditError::NotFound {
                            path,
                            what: "search text".to_string(),
                        })
                    }
                    1 => (
                        current.replacen(search.as_str(), replace, 1),
                        format!("✅ replaced 1 occurrence in {}", path.display()),
                    ),
                    count => return Err(EditError::AmbiguousMatch { path, count }),
                }
            }
            EditOperation::InsertAfter { anchor, content, .. } => {
                let mut lines = split_lines(&read_existing(view, &path)?);
                let index = find_anchor(&lines, anchor).ok_or_else(|| anchor_missing(&path, anchor))?;
                ensure_newline(&mut lines[index]);
                let inserted = content_lines(content);
                let count = inserted.len();
                lines.splice(index + 1..index + 1, inserted);
                (
                    lines.concat(),
                    format!(
                        "✅ inserted {} line(s) after line {} in {}",
                        count,
                        index + 1,
                        path.display()
                    ),
                )
            }
            EditOperation::InsertBefore { anchor, content, .. } => {
                let mut lines = split_lines(&read_existing(view, &path)?);
                let index = find_anchor(&lines, anchor).ok_or_else(|| anchor_missing(&path, anchor))?;
                let inserted = content_lines(content);
                let count = inserted.len();
                lines.splice(index..index, inserted);
                (
                    lines.concat(),
                    format!(
                        "✅ inserted {} line(s) before line {} in {}",
                        count,
                        index + 1,
                        path.display()
                    ),
                )
            }
            EditOperation::ReplaceLines {
                start, end, content, ..
            } => {
                let current = read_existing(view, &path)?;
                let mut lines = split_lines(&current);
                let line_count = lines.len();
                if *start < 1 || start > end || *end > line_count as i64 {
                    return Err(EditError::OutOfRange {
                        path,
                        start: *start,
                        end: *end,
                        line_count,
                    });
                }
                let (first, last) = (*start as usize - 1, *end as usize);
                let mut replacement = content_lines(content);
                // Keep a missing final newline missing
                if last == line_count && !current.ends_with('\n') {
                    if let Some(tail) = replacement.last_mut() {
                        if tail.ends_with('\n') {
                            tail.pop();
                        }
                    }
                }
                let count = replacement.len();
                lines.splice(first..last, replacement);
                (
                    lines.concat(),
                    format!(
                        "✅ replaced lines {}-{} with {} line(s) in {}",
                        start,
                        end,
                        count,
                        path.display()
                    ),
                )
            }
        };

        Ok(FileMutation {
            path,
            new_content,
            summary,
        })
    }
}

/// Contents of a file every non-create operation requires to exist.
fn read_existing(view: &dyn FileView, path: &Path) -> Result<String, EditError> {
    view.read(path)?.ok_or_else(|| EditError::NotFound {
        path: path.to_path_buf(),
        what: "file".to_string(),
    })
}

fn anchor_missing(path: &Path, anchor: &str) -> EditError {
    EditError::NotFound {
        path: path.to_path_buf(),
        what: format!("line containing '{}'", preview(anchor)),
    }
}

/// Lines with their terminators kept, so joining them reproduces the input.
fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

/// Content to insert as whole lines, each newline-terminated.
fn content_lines(content: &str) -> Vec<String> {
    let mut lines = split_lines(content);
    if let Some(last) = lines.last_mut() {
        ensure_newline(last);
    }
    lines
}

fn ensure_newline(line: &mut String) {
    if !line.ends_with('\n') {
        line.push('\n');
    }
}

/// Number of offsets at which `needle` occurs, overlapping ones included.
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack
        .char_indices()
        .filter(|&(offset, _)| haystack[offset..].starts_with(needle))
        .count()
}

fn find_anchor(lines: &[String], anchor: &str) -> Option<usize> {
    lines.iter().position(|line| line.contains(anchor))
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(50).collect();
    if preview.len() < text.len() {
        preview.push_str("...");
    }
    preview
}

/// Argument accessor that tracks which keys were consumed, so leftovers can be
/// reported as unexpected.
struct Arguments<'a> {
    kind: OperationKind,
    map: &'a Map<String, Value>,
    used: HashSet<&'a str>,
}

impl<'a> Arguments<'a> {
    fn new(kind: OperationKind, map: &'a Map<String, Value>) -> Self {
        Self {
            kind,
            map,
            used: HashSet::new(),
        }
    }

    fn invalid(&self, problem: impl Into<String>) -> EditError {
        EditError::validation(self.kind.as_str(), problem)
    }

    fn mark_used(&mut self, key: &str) {
        let map: &'a Map<String, Value> = self.map;
        if let Some((stored, _)) = map.get_key_value(key) {
            self.used.insert(stored.as_str());
        }
    }

    /// The value under the first alias present. Two aliases at once is an error.
    fn lookup(&mut self, keys: &[&str]) -> Result<Option<(&'a str, &'a Value)>, EditError> {
        let map: &'a Map<String, Value> = self.map;
        let mut found: Option<(&'a str, &'a Value)> = None;
        for key in keys {
            if let Some((stored, value)) = map.get_key_value(*key) {
                if let Some((first, _)) = found {
                    return Err(self.invalid(format!(
                        "arguments '{}' and '{}' name the same thing",
                        first, stored
                    )));
                }
                found = Some((stored.as_str(), value));
            }
        }
        if let Some((key, _)) = found {
            self.used.insert(key);
        }
        Ok(found)
    }

    fn required_string(&mut self, keys: &[&str]) -> Result<String, EditError> {
        match self.lookup(keys)? {
            Some((_, Value::String(s))) => Ok(s.clone()),
            Some((key, _)) => Err(self.invalid(format!("argument '{}' must be a string", key))),
            None => Err(self.invalid(format!("missing argument '{}'", keys[0]))),
        }
    }

    /// Integers, or decimal strings for formats that only carry text.
    fn required_line(&mut self, keys: &[&str]) -> Result<i64, EditError> {
        match self.lookup(keys)? {
            Some((key, Value::Number(n))) => n
                .as_i64()
                .ok_or_else(|| self.invalid(format!("argument '{}' must be a whole number", key))),
            Some((key, Value::String(s))) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| self.invalid(format!("argument '{}' must be a whole number", key))),
            Some((key, _)) => {
                Err(self.invalid(format!("argument '{}' must be a whole number", key)))
            }
            None => Err(self.invalid(format!("missing argument '{}'", keys[0]))),
        }
    }

    fn flag(&mut self, keys: &[&str]) -> Result<Option<bool>, EditError> {
        match self.lookup(keys)? {
            None => Ok(None),
            Some((_, Value::Bool(b))) => Ok(Some(*b)),
            Some((key, Value::String(s))) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(self.invalid(format!("argument '{}' must be true or false", key))),
            },
            Some((key, _)) => Err(self.invalid(format!("argument '{}' must be true or false", key))),
        }
    }

    fn finish(self) -> Result<(), EditError> {
        let unexpected: Vec<&str> = self
            .map
            .keys()
            .map(String::as_str)
            .filter(|key| !self.used.contains(key))
            .collect();
        if unexpected.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(format!("unexpected argument(s): {}", unexpected.join(", "))))
        }
    }
}
