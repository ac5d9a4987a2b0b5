//! Interrupting a running turn.
//!
//! A watcher task listens for trigger presses. Two presses inside the
//! configured window interrupt the current turn, in this order:
//!
//! 1. cancel the turn's token and call the transport's stop function, so no
//!    further fragments reach the decoder
//! 2. roll back the turn's checkpoint if it is still open
//! 3. mark the turn aborted
//!
//! The foreground re-checks the token while holding the engine lock before
//! every apply and before commit, so a rollback can never interleave with a
//! write, and once a checkpoint is committed a late interrupt finds nothing
//! to undo.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::edit_engine::EditEngine;
use crate::ui_writer::UiWriter;

/// What a single trigger press means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// First press; a second one inside the window interrupts
    Hint,
    Interrupt,
}

/// Double-press detector.
#[derive(Debug)]
pub struct InterruptHandler {
    window: Duration,
    last_press: Option<Instant>,
}

impl InterruptHandler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_press: None,
        }
    }

    pub fn press(&mut self) -> PressOutcome {
        self.press_at(Instant::now())
    }

    pub fn press_at(&mut self, now: Instant) -> PressOutcome {
        match self.last_press {
            Some(previous) if now.saturating_duration_since(previous) <= self.window => {
                self.last_press = None;
                PressOutcome::Interrupt
            }
            _ => {
                self.last_press = Some(now);
                PressOutcome::Hint
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Running,
    Completed,
    Aborted,
}

impl TurnStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TurnStatus::Running,
            1 => TurnStatus::Completed,
            _ => TurnStatus::Aborted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TurnStatus::Running => 0,
            TurnStatus::Completed => 1,
            TurnStatus::Aborted => 2,
        }
    }
}

type StopStreamFn = Box<dyn Fn() + Send + Sync>;

/// Shared state of one running turn.
pub struct TurnHandle {
    turn: u64,
    token: CancellationToken,
    status: AtomicU8,
    interrupt_claimed: AtomicBool,
    stop_stream: std::sync::Mutex<Option<StopStreamFn>>,
}

impl std::fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("turn", &self.turn)
            .field("status", &self.status())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl TurnHandle {
    fn new(turn: u64) -> Self {
        Self {
            turn,
            token: CancellationToken::new(),
            status: AtomicU8::new(TurnStatus::Running.as_u8()),
            interrupt_claimed: AtomicBool::new(false),
            stop_stream: std::sync::Mutex::new(None),
        }
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn status(&self) -> TurnStatus {
        TurnStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Register the transport's stop function, called when the turn is interrupted.
    pub fn on_stop_stream(&self, stop: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.stop_stream.lock() {
            *slot = Some(Box::new(stop));
        }
    }

    fn stop_stream(&self) {
        if let Ok(slot) = self.stop_stream.lock() {
            if let Some(stop) = slot.as_ref() {
                stop();
            }
        }
    }

    /// Move from Running to `status`. Terminal states never change.
    pub(crate) fn finish(&self, status: TurnStatus) -> bool {
        self.status
            .compare_exchange(
                TurnStatus::Running.as_u8(),
                status.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// True for exactly one caller per turn.
    fn claim_interrupt(&self) -> bool {
        !self.interrupt_claimed.swap(true, Ordering::SeqCst)
    }
}

/// What an interrupt request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    NoActiveTurn,
    /// The turn was already interrupted; later triggers are no-ops
    AlreadyInterrupted { turn: u64 },
    /// The turn committed before the interrupt reached it; nothing was undone
    AlreadyCompleted { turn: u64 },
    Interrupted {
        turn: u64,
        /// Id of the checkpoint that was rolled back, if the turn had one open
        rolled_back: Option<String>,
    },
    RollbackFailed { turn: u64, error: String },
}

/// Tracks the current turn and owns the path from trigger to rollback.
#[derive(Clone)]
pub struct InterruptCoordinator {
    engine: Arc<Mutex<EditEngine>>,
    current: Arc<std::sync::Mutex<Option<Arc<TurnHandle>>>>,
    last_turn: Arc<AtomicU64>,
}

impl InterruptCoordinator {
    pub fn new(engine: Arc<Mutex<EditEngine>>) -> Self {
        Self {
            engine,
            current: Arc::new(std::sync::Mutex::new(None)),
            last_turn: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<EditEngine>> {
        &self.engine
    }

    /// Start a new turn with the next sequence number.
    pub fn begin_turn(&self) -> Arc<TurnHandle> {
        let turn = self.last_turn.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(TurnHandle::new(turn));
        if let Ok(mut current) = self.current.lock() {
            *current = Some(Arc::clone(&handle));
        }
        debug!("Turn {} started", turn);
        handle
    }

    pub fn current_turn(&self) -> Option<Arc<TurnHandle>> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    /// Forget `handle` if it is still the current turn.
    pub fn end_turn(&self, handle: &TurnHandle) {
        if let Ok(mut current) = self.current.lock() {
            if current.as_ref().is_some_and(|h| h.turn == handle.turn) {
                *current = None;
            }
        }
    }

    /// Interrupt the current turn.
    pub async fn interrupt(&self) -> InterruptOutcome {
        let Some(handle) = self.current_turn() else {
            return InterruptOutcome::NoActiveTurn;
        };
        if !handle.claim_interrupt() {
            return InterruptOutcome::AlreadyInterrupted { turn: handle.turn };
        }
        match handle.status() {
            TurnStatus::Running => {}
            TurnStatus::Completed => return InterruptOutcome::AlreadyCompleted { turn: handle.turn },
            TurnStatus::Aborted => return InterruptOutcome::AlreadyInterrupted { turn: handle.turn },
        }

        info!("Interrupting turn {}", handle.turn);
        handle.token.cancel();
        handle.stop_stream();

        let rolled_back = {
            let mut engine = self.engine.lock().await;
            engine.rollback_turn(handle.turn)
        };

        // The foreground may have committed while we waited for the lock
        if !handle.finish(TurnStatus::Aborted) && handle.status() == TurnStatus::Completed {
            info!("Turn {} completed before the interrupt took effect", handle.turn);
            return InterruptOutcome::AlreadyCompleted { turn: handle.turn };
        }

        match rolled_back {
            Ok(rolled_back) => InterruptOutcome::Interrupted {
                turn: handle.turn,
                rolled_back,
            },
            Err(e) => {
                warn!("Rollback of turn {} failed: {}", handle.turn, e);
                InterruptOutcome::RollbackFailed {
                    turn: handle.turn,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Spawn the watcher: every `()` received on `presses` is one trigger press.
/// The task ends when the sender side is dropped.
pub fn spawn_interrupt_watcher<W>(
    mut presses: mpsc::Receiver<()>,
    coordinator: InterruptCoordinator,
    window: Duration,
    ui: Arc<W>,
) -> JoinHandle<()>
where
    W: UiWriter + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut handler = InterruptHandler::new(window);
        while presses.recv().await.is_some() {
            match handler.press() {
                PressOutcome::Hint => ui.print_interrupt_hint(),
                PressOutcome::Interrupt => {
                    let outcome = coordinator.interrupt().await;
                    ui.print_interrupt_outcome(&outcome);
                }
            }
        }
        debug!("Interrupt watcher stopped");
    })
}
