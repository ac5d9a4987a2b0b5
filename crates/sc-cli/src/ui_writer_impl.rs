use crossterm::style::{Color, ResetColor, SetForegroundColor};
use sc_core::{InterruptOutcome, OperationOutcome, UiWriter};
use std::io::{self, Write};

/// Console implementation of UiWriter. Agent text goes to stdout as it
/// streams; tool outcomes and interrupt notices are printed on their own lines.
pub struct ConsoleUiWriter {
    /// Whether the last agent text left the cursor mid-line
    mid_line: std::sync::Mutex<bool>,
}

impl ConsoleUiWriter {
    pub fn new() -> Self {
        Self {
            mid_line: std::sync::Mutex::new(false),
        }
    }

    fn start_line(&self) {
        if let Ok(mut mid_line) = self.mid_line.lock() {
            if *mid_line {
                println!();
                *mid_line = false;
            }
        }
    }

    fn print_colored(&self, color: Color, message: &str) {
        self.start_line();
        println!("{}{}{}", SetForegroundColor(color), message, ResetColor);
    }
}

impl Default for ConsoleUiWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl UiWriter for ConsoleUiWriter {
    fn println(&self, message: &str) {
        self.start_line();
        println!("{}", message);
    }

    fn print_agent_response(&self, content: &str) {
        print!("{}", content);
        let _ = io::stdout().flush();
        if let Ok(mut mid_line) = self.mid_line.lock() {
            *mid_line = !content.ends_with('\n');
        }
    }

    fn print_tool_outcome(&self, outcome: &OperationOutcome) {
        if outcome.is_applied() {
            self.print_colored(Color::Green, &outcome.to_tool_result());
        } else {
            let target = outcome
                .path
                .as_ref()
                .map(|p| format!(" {}", p.display()))
                .unwrap_or_default();
            self.print_colored(
                Color::Red,
                &format!("{}{}: {}", outcome.tool, target, outcome.to_tool_result()),
            );
        }
    }

    fn print_interrupt_hint(&self) {
        self.print_colored(Color::Yellow, "⚠️  Press Ctrl+C again to interrupt this turn");
    }

    fn print_interrupt_outcome(&self, outcome: &InterruptOutcome) {
        match outcome {
            InterruptOutcome::NoActiveTurn => self.println("Nothing to interrupt"),
            InterruptOutcome::AlreadyInterrupted { turn } => {
                self.println(&format!("Turn {} is already interrupted", turn))
            }
            InterruptOutcome::AlreadyCompleted { turn } => self.println(&format!(
                "Turn {} finished before the interrupt; its changes were kept",
                turn
            )),
            InterruptOutcome::Interrupted {
                turn,
                rolled_back: Some(id),
            } => self.print_colored(
                Color::Yellow,
                &format!("⏹️  Turn {} interrupted; rolled back checkpoint {}", turn, id),
            ),
            InterruptOutcome::Interrupted {
                turn,
                rolled_back: None,
            } => self.print_colored(
                Color::Yellow,
                &format!("⏹️  Turn {} interrupted; no files had changed", turn),
            ),
            InterruptOutcome::RollbackFailed { turn, error } => self.print_colored(
                Color::Red,
                &format!("❌ Turn {} interrupted but rollback failed: {}", turn, error),
            ),
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
