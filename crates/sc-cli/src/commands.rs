//! Checkpoint listing and undo.

use anyhow::Result;
use chrono::Local;
use sc_core::{Checkpoint, EditEngine, UiWriter};

pub fn format_checkpoint(checkpoint: &Checkpoint) -> String {
    format!(
        "{}  turn {:<4} {:<11} {} file(s)  {}",
        checkpoint.id,
        checkpoint.turn,
        checkpoint.state.to_string(),
        checkpoint.file_count(),
        checkpoint
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn print_checkpoints<W: UiWriter + ?Sized>(engine: &EditEngine, ui: &W) {
    let checkpoints = engine.list_checkpoints();
    if checkpoints.is_empty() {
        ui.println("No checkpoints");
        return;
    }
    for checkpoint in &checkpoints {
        ui.println(&format_checkpoint(checkpoint));
    }
}

/// Undo `id`, or the newest checkpoint. Returns the ids that were undone.
pub fn undo<W: UiWriter + ?Sized>(
    engine: &mut EditEngine,
    id: Option<&str>,
    ui: &W,
) -> Result<Vec<String>> {
    let undone = match id {
        Some(id) => engine.rollback(id)?,
        None => engine.undo_last()?,
    };
    match undone.as_slice() {
        [] => ui.println("Nothing undone: checkpoint was already rolled back"),
        [only] => ui.println(&format!("↩️  Undid checkpoint {}", only)),
        many => {
            ui.println(&format!("↩️  Undid {} checkpoints:", many.len()));
            for id in many {
                ui.println(&format!("   {}", id));
            }
        }
    }
    Ok(undone)
}
