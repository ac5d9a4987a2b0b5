//! Running one turn from a recorded model response.

use std::time::Duration;

use anyhow::Result;
use sc_core::{TurnReport, TurnRunner, TurnStatus, UiWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fragments buffered between the producer and the turn
const FRAGMENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Characters per fragment, at least one
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// Split `text` into fragments of at most `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            fragments.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

/// Feed `fragments` through a channel, stopping early once `stop` fires or
/// the consumer goes away.
pub fn stream_fragments(
    fragments: Vec<String>,
    delay: Duration,
    stop: CancellationToken,
) -> ReceiverStream<Result<String>> {
    let (sender, receiver) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        for fragment in fragments {
            if !delay.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if stop.is_cancelled() || sender.send(Ok(fragment)).await.is_err() {
                break;
            }
        }
        debug!("Fragment producer finished");
    });
    ReceiverStream::new(receiver)
}

/// Run one turn over `response`. Interrupt wiring is up to the caller.
pub async fn execute_turn<W>(
    runner: &TurnRunner,
    response: &str,
    options: &ApplyOptions,
    ui: &W,
) -> Result<TurnReport>
where
    W: UiWriter + ?Sized,
{
    let handle = runner.begin_turn();
    let stop = CancellationToken::new();
    let stop_stream = stop.clone();
    handle.on_stop_stream(move || stop_stream.cancel());

    let stream = stream_fragments(
        chunk_text(response, options.chunk_size),
        options.chunk_delay,
        stop,
    );
    runner.run_turn(handle, stream, ui).await
}

/// Forward every Ctrl+C to `presses` until the receiver is dropped.
pub fn spawn_ctrl_c_listener(presses: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if presses.send(()).await.is_err() {
                break;
            }
        }
    })
}

/// One-line summary of a finished turn.
pub fn summarize_turn(report: &TurnReport) -> String {
    let mut summary = match report.status {
        TurnStatus::Aborted => format!("Turn {} interrupted", report.turn),
        _ => format!("Turn {} complete", report.turn),
    };
    summary.push_str(&format!(
        ": {} applied, {} failed",
        report.applied_count(),
        report.failed_count()
    ));
    if let Some(id) = &report.checkpoint {
        summary.push_str(&format!(" (checkpoint {})", id));
    }
    if let Some(error) = &report.stream_error {
        summary.push_str(&format!("; stream ended early: {}", error));
    }
    summary
}
