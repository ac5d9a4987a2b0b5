//! The foreground pipeline of one turn: stream, decode, resolve, apply.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::edit_engine::OperationOutcome;
use crate::interrupt::{InterruptCoordinator, TurnHandle, TurnStatus};
use crate::streaming_parser::StreamingToolParser;
use crate::ui_writer::UiWriter;
use crate::{ToolCall, ToolCallFormat};

/// Everything a finished (or aborted) turn produced.
#[derive(Debug)]
pub struct TurnReport {
    pub turn: u64,
    pub status: TurnStatus,
    /// Model text with recognized tool calls removed
    pub visible_text: String,
    /// One entry per decoded call, in textual order
    pub outcomes: Vec<OperationOutcome>,
    /// Committed checkpoint id, if the turn changed files and completed
    pub checkpoint: Option<String>,
    /// Set when the model stream failed part way
    pub stream_error: Option<String>,
}

impl TurnReport {
    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.applied_count()
    }
}

/// Runs turns against the coordinator's engine.
#[derive(Clone)]
pub struct TurnRunner {
    coordinator: InterruptCoordinator,
    format: ToolCallFormat,
}

impl TurnRunner {
    pub fn new(coordinator: InterruptCoordinator, format: ToolCallFormat) -> Self {
        Self { coordinator, format }
    }

    pub fn coordinator(&self) -> &InterruptCoordinator {
        &self.coordinator
    }

    /// Start a turn. Register the transport's stop function on the handle
    /// before passing it to [`TurnRunner::run_turn`].
    pub fn begin_turn(&self) -> Arc<TurnHandle> {
        self.coordinator.begin_turn()
    }

    /// Consume the model stream for `handle`'s turn.
    ///
    /// Tool calls are applied as soon as they are decoded, in textual order; a
    /// failed operation is reported and the turn carries on. When the turn is
    /// interrupted no further fragment is read and no further operation runs.
    pub async fn run_turn<S, W>(
        &self,
        handle: Arc<TurnHandle>,
        stream: S,
        ui: &W,
    ) -> Result<TurnReport>
    where
        S: Stream<Item = Result<String>>,
        W: UiWriter + ?Sized,
    {
        let result = self.drive(&handle, stream, ui).await;
        self.coordinator.end_turn(&handle);
        result
    }

    async fn drive<S, W>(&self, handle: &TurnHandle, stream: S, ui: &W) -> Result<TurnReport>
    where
        S: Stream<Item = Result<String>>,
        W: UiWriter + ?Sized,
    {
        let turn = handle.turn();
        let token = handle.token().clone();
        let mut parser = StreamingToolParser::new(self.format);
        let mut outcomes = Vec::new();
        let mut stream_error = None;

        tokio::pin!(stream);

        'stream: loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    let calls = parser.process_fragment(&fragment);
                    emit_visible(&mut parser, ui);
                    for call in calls {
                        if !self.apply_call(handle, &call, &mut outcomes, ui).await {
                            break 'stream;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Model stream for turn {} failed: {:#}", turn, e);
                    stream_error = Some(format!("{:#}", e));
                    break;
                }
                None => break,
            }
        }

        if !token.is_cancelled() {
            for call in parser.finish() {
                if !self.apply_call(handle, &call, &mut outcomes, ui).await {
                    break;
                }
            }
            emit_visible(&mut parser, ui);
        }
        ui.flush();

        let checkpoint = {
            let mut engine = self.coordinator.engine().lock().await;
            if token.is_cancelled() {
                // The watcher may still be waiting for the lock; whoever gets
                // there first rolls back and the other finds nothing open.
                engine
                    .rollback_turn(turn)
                    .with_context(|| format!("Failed to roll back turn {}", turn))?;
                handle.finish(TurnStatus::Aborted);
                None
            } else {
                let committed = engine
                    .commit_turn(turn)
                    .with_context(|| format!("Failed to commit turn {}", turn))?;
                handle.finish(TurnStatus::Completed);
                committed
            }
        };

        let report = TurnReport {
            turn,
            status: handle.status(),
            visible_text: parser.visible_text(),
            outcomes,
            checkpoint,
            stream_error,
        };
        info!(
            "Turn {} {:?}: {} applied, {} failed",
            turn,
            report.status,
            report.applied_count(),
            report.failed_count()
        );
        Ok(report)
    }

    /// Apply one call under the engine lock. Returns false once the turn has
    /// been cancelled.
    async fn apply_call<W>(
        &self,
        handle: &TurnHandle,
        call: &ToolCall,
        outcomes: &mut Vec<OperationOutcome>,
        ui: &W,
    ) -> bool
    where
        W: UiWriter + ?Sized,
    {
        let outcome = {
            let mut engine = self.coordinator.engine().lock().await;
            if handle.is_cancelled() {
                None
            } else {
                Some(engine.apply(handle.turn(), call))
            }
        };

        match outcome {
            Some(outcome) => {
                ui.print_tool_outcome(&outcome);
                outcomes.push(outcome);
                true
            }
            None => {
                debug!("Skipping '{}': turn {} was interrupted", call.tool, handle.turn());
                outcomes.push(OperationOutcome::interrupted(call));
                false
            }
        }
    }
}

fn emit_visible<W: UiWriter + ?Sized>(parser: &mut StreamingToolParser, ui: &W) {
    let visible = parser.drain_visible();
    if !visible.is_empty() {
        ui.print_agent_response(&visible);
    }
}
