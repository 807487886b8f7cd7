//! Correlation of outbound requests with inbound responses.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result, ServerError};

/// Type alias for the single-use completion handle of a pending request.
pub type ResponseSender = oneshot::Sender<Result<Value>>;

/// Type alias for the caller side of a pending request.
pub type ResponseReceiver = oneshot::Receiver<Result<Value>>;

/// Assigns correlation ids and holds one pending slot per in-flight request.
///
/// Ids start at 1 and are never reused for the lifetime of the dispatcher,
/// which outlives individual connections.
#[derive(Debug, Default)]
pub struct Dispatcher {
    last_id: AtomicU64,
    pending: DashMap<u64, ResponseSender>,
}

impl Dispatcher {
    /// Create a dispatcher whose first id will be 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and a pending slot for it.
    pub fn register(&self) -> (u64, ResponseReceiver) {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();

        self.pending.insert(id, tx);
        debug!("Registered pending request {} (total: {})", id, self.pending.len());

        (id, rx)
    }

    /// Resolve the pending slot for `id`.
    ///
    /// Returns `false` if nothing was waiting on that id, which happens for
    /// duplicate or stale responses and is not an error.
    pub fn resolve(&self, id: u64, outcome: std::result::Result<Value, ServerError>) -> bool {
        // Remove first so a second response for the same id finds nothing.
        let Some((_, sender)) = self.pending.remove(&id) else {
            warn!("Received response for unknown request: {}", id);
            return false;
        };

        if sender.send(outcome.map_err(Error::Server)).is_err() {
            debug!("Caller for request {} went away before its response", id);
        }

        true
    }

    /// Drop the pending slot for `id` without notifying anyone.
    pub fn cancel(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every pending request with [`Error::ConnectionLost`].
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, sender)) = self.pending.remove(&id) {
                let _ = sender.send(Err(Error::ConnectionLost));
                failed += 1;
            }
        }

        if failed > 0 {
            debug!("Failed {} pending requests after connection loss", failed);
        }

        failed
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The most recently issued id (0 before the first request).
    #[must_use]
    pub fn last_id(&self) -> u64 {
        self.last_id.load(Ordering::SeqCst)
    }
}
