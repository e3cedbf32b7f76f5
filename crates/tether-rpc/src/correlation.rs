//! Correlation registry pairing in-flight request ids with waiting callers.
//!
//! Both sides of the wire use the same registry: the client correlates
//! responses arriving over its socket, and tests drive it directly.
//! Every registered id reaches exactly one terminal outcome: a
//! resolution, a rejection, a deadline expiry, or a sweep via
//! [`CorrelationRegistry::cancel_all`] /
//! [`CorrelationRegistry::cancel_owner`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::RpcError;

/// Deadline applied to tool calls when the caller does not pick one.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

type Outcome = Result<Value, RpcError>;

struct Pending {
    tx: oneshot::Sender<Outcome>,
    owner: Option<String>,
    registered_at: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Tracks requests awaiting a correlated response.
///
/// Lookups are keyed by the request id string. Entries are removed
/// before their outcome is sent, so a second completion attempt for
/// the same id finds nothing and degrades to a logged no-op.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Arc<DashMap<String, Pending>>,
}

impl CorrelationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an id and returns the future its caller awaits.
    ///
    /// With `Some(deadline)`, a timer rejects the entry with
    /// [`RpcError::Timeout`] once the deadline elapses; `None` leaves
    /// the entry pending until completed or swept. Fails with
    /// [`RpcError::DuplicateId`] when the id is already in flight.
    pub fn register(
        &self,
        id: &str,
        deadline: Option<Duration>,
    ) -> Result<ResponseFuture, RpcError> {
        self.register_for_owner(id, deadline, None)
    }

    /// Registers an id on behalf of an owner, for scoped sweeps.
    ///
    /// Owners partition entries so [`Self::cancel_owner`] can reject
    /// one connection's requests without touching another's.
    pub fn register_for_owner(
        &self,
        id: &str,
        deadline: Option<Duration>,
        owner: Option<&str>,
    ) -> Result<ResponseFuture, RpcError> {
        match self.pending.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RpcError::duplicate(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let timer = deadline.map(|deadline| {
                    let pending = Arc::clone(&self.pending);
                    let id = id.to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(deadline).await;
                        expire(&pending, &id);
                    })
                });
                let _ = slot.insert(Pending {
                    tx,
                    owner: owner.map(str::to_string),
                    registered_at: Instant::now(),
                    timer,
                });
                Ok(ResponseFuture { rx })
            }
        }
    }

    /// Reassigns an entry's owner. Returns false for unknown ids.
    pub fn set_owner(&self, id: &str, owner: &str) -> bool {
        match self.pending.get_mut(id) {
            Some(mut entry) => {
                entry.owner = Some(owner.to_string());
                true
            }
            None => false,
        }
    }

    /// Delivers a success outcome to the waiting caller.
    ///
    /// Returns false when the id is unknown (late or duplicate
    /// response), which is logged and otherwise ignored.
    pub fn resolve(&self, id: &str, results: Value) -> bool {
        self.complete(id, Ok(results))
    }

    /// Delivers an error outcome to the waiting caller.
    ///
    /// Same unknown-id semantics as [`Self::resolve`].
    pub fn reject(&self, id: &str, error: RpcError) -> bool {
        self.complete(id, Err(error))
    }

    /// Rejects every pending entry with a clone of `reason`.
    ///
    /// Returns how many entries were swept.
    pub fn cancel_all(&self, reason: &RpcError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        self.sweep(ids, reason)
    }

    /// Rejects pending entries registered for `owner`, leaving the
    /// rest untouched. Returns how many entries were swept.
    pub fn cancel_owner(&self, owner: &str, reason: &RpcError) -> usize {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().owner.as_deref() == Some(owner))
            .map(|entry| entry.key().clone())
            .collect();
        self.sweep(ids, reason)
    }

    /// Whether an id is currently in flight.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no entries are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn sweep(&self, ids: Vec<String>, reason: &RpcError) -> usize {
        let mut swept = 0;
        for id in ids {
            if self.complete(&id, Err(reason.clone())) {
                swept += 1;
            }
        }
        swept
    }

    fn complete(&self, id: &str, outcome: Outcome) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                if entry.tx.send(outcome).is_err() {
                    debug!(request_id = %id, "caller dropped before outcome delivery");
                }
                true
            }
            None => {
                warn!(request_id = %id, "no pending request for id, dropping outcome");
                false
            }
        }
    }
}

impl Drop for CorrelationRegistry {
    fn drop(&mut self) {
        // Entries die with the map; waiters observe the closed channel.
        for entry in self.pending.iter() {
            if let Some(timer) = &entry.value().timer {
                timer.abort();
            }
        }
    }
}

fn expire(pending: &DashMap<String, Pending>, id: &str) {
    if let Some((_, entry)) = pending.remove(id) {
        warn!(
            request_id = %id,
            elapsed = ?entry.registered_at.elapsed(),
            "request deadline elapsed"
        );
        let _ = entry.tx.send(Err(RpcError::timeout_for(id)));
    }
}

/// Awaits the terminal outcome of a registered request.
///
/// Resolves to the registry's closure as [`RpcError::Disconnected`]
/// when the registry is dropped with the entry still pending.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for ResponseFuture {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::disconnected(
                "correlation registry closed before delivery",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
