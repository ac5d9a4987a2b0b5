use crate::edit_engine::OperationOutcome;
use crate::interrupt::InterruptOutcome;

/// Interface for UI output operations
/// This trait abstracts all UI operations to allow different implementations
/// (console, tests, ...) without coupling the core logic to specific output methods.
pub trait UiWriter: Send + Sync {
    /// Print a message with a newline
    fn println(&self, message: &str);

    /// Print agent response text inline (for streaming). Recognized tool
    /// calls have already been removed.
    fn print_agent_response(&self, content: &str);

    /// Print the result of one applied or failed tool call
    fn print_tool_outcome(&self, outcome: &OperationOutcome);

    /// Tell the user a second press will interrupt the turn
    fn print_interrupt_hint(&self);

    /// Report what an interruption did
    fn print_interrupt_outcome(&self, outcome: &InterruptOutcome);

    /// Flush any buffered output
    fn flush(&self);
}

/// A no-op implementation for when UI output is not needed
pub struct NullUiWriter;

impl UiWriter for NullUiWriter {
    fn println(&self, _message: &str) {}
    fn print_agent_response(&self, _content: &str) {}
    fn print_tool_outcome(&self, _outcome: &OperationOutcome) {}
    fn print_interrupt_hint(&self) {}
    fn print_interrupt_outcome(&self, _outcome: &InterruptOutcome) {}
    fn flush(&self) {}
}
