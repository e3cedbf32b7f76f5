//! Liveness monitoring for a session.
//!
//! Clients drive the heartbeat by sending pings; the server only
//! watches. At each expected interval the watchdog checks and clears
//! the session's liveness flag; a session dies only after enough
//! consecutive silent intervals to fill the grace window, never after
//! a single missed ping.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::Session;

/// Outcome of the watchdog loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Silence filled the grace window.
    TimedOut,
    /// The session tore down for another reason first.
    Cancelled,
}

/// Watches a session's liveness flag until it lapses or the session is
/// cancelled.
///
/// The tolerated miss count is `timeout / interval`, floored at two so
/// one transient delay can never kill a session.
pub async fn run_heartbeat(
    session: Arc<Session>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticks = time::interval(interval);
    // The first tick completes immediately; skip it.
    let _ = ticks.tick().await;

    let interval_ms = interval.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = ((timeout.as_millis() / interval_ms) as u32).max(2);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if session.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::SessionId;
    use tokio::sync::mpsc;

    fn make_session() -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Session::new(SessionId::new(), tx))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_times_out_after_the_grace_window() {
        let session = make_session();
        let result = run_heartbeat(
            session,
            Duration::from_secs(15),
            Duration::from_secs(45),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test]
    async fn one_missed_window_is_tolerated() {
        let session = make_session();
        let watched = Arc::clone(&session);
        let cancel = CancellationToken::new();
        // interval 50ms, timeout 150ms: three consecutive misses kill.
        let watchdog = tokio::spawn(run_heartbeat(
            watched,
            Duration::from_millis(50),
            Duration::from_millis(150),
            cancel.clone(),
        ));

        // Stay silent through one full interval, then resume.
        tokio::time::sleep(Duration::from_millis(70)).await;
        for _ in 0..8 {
            session.record_heartbeat();
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(!watchdog.is_finished());

        cancel.cancel();
        assert_eq!(watchdog.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_stops_the_watchdog() {
        let session = make_session();
        let cancel = CancellationToken::new();
        let watchdog = tokio::spawn(run_heartbeat(
            session,
            Duration::from_secs(60),
            Duration::from_secs(180),
            cancel.clone(),
        ));

        cancel.cancel();
        assert_eq!(watchdog.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn steady_heartbeats_keep_the_session_alive() {
        let session = make_session();
        let watched = Arc::clone(&session);
        let cancel = CancellationToken::new();
        let watchdog = tokio::spawn(run_heartbeat(
            watched,
            Duration::from_millis(50),
            Duration::from_millis(150),
            cancel.clone(),
        ));

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.record_heartbeat();
        }
        assert!(!watchdog.is_finished());

        cancel.cancel();
        assert_eq!(watchdog.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_floor_is_two_intervals() {
        // timeout == interval still tolerates one miss.
        let session = make_session();
        let started = tokio::time::Instant::now();
        let result = run_heartbeat(
            session,
            Duration::from_secs(10),
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }
}
