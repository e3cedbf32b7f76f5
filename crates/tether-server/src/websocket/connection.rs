//! Per-connection session state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::SessionId;

/// Lifecycle of a session.
///
/// `Open` accepts traffic in both directions. `Closing` means teardown
/// has begun: no new outbound frames are accepted and in-flight
/// dispatch results are discarded. `Closed` means all resources are
/// released and the id will never be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting traffic.
    Open,
    /// Teardown begun, outbound writes refused.
    Closing,
    /// Fully released.
    Closed,
}

/// One live client connection.
///
/// Outbound frames funnel through a bounded channel owned by a single
/// writer task; [`Session::send`] never blocks.
pub struct Session {
    /// Unique session id, assigned at upgrade.
    pub id: SessionId,
    /// When the session was established.
    pub connected_at: Instant,
    tx: mpsc::Sender<String>,
    state: Mutex<SessionState>,
    /// Set by every inbound heartbeat, cleared by each watchdog check.
    alive: AtomicBool,
    last_heartbeat: Mutex<Instant>,
    dropped_frames: AtomicU64,
    cancel: CancellationToken,
}

impl Session {
    /// Creates an open session feeding the given writer channel.
    pub fn new(id: SessionId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            connected_at: now,
            tx,
            state: Mutex::new(SessionState::Open),
            alive: AtomicBool::new(true),
            last_heartbeat: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the session still accepts outbound frames.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Moves `Open` to `Closing`. Returns `true` for the call that won
    /// the transition, so close work runs once.
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Open {
            *state = SessionState::Closing;
            true
        } else {
            false
        }
    }

    /// Marks the session fully released.
    pub fn mark_closed(&self) {
        *self.state.lock() = SessionState::Closed;
    }

    /// Enqueues a frame for the writer task.
    ///
    /// Returns `false` without blocking when the session is no longer
    /// open or the buffer is full; full-buffer drops are counted.
    pub fn send(&self, frame: String) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped because the outbound buffer was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Stamps the liveness state; called for every inbound ping.
    pub fn record_heartbeat(&self) {
        self.alive.store(true, Ordering::Relaxed);
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Reads and clears the liveness flag.
    ///
    /// Returns `true` when a heartbeat arrived since the previous
    /// check; the watchdog calls this once per expected interval.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last heartbeat (or since connect).
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Token cancelled when the session tears down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
