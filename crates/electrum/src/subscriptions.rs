//! Name-keyed multicast registry for server notifications.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};

/// Callback invoked with the `params` of a notification.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying one registered listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
enum Slot {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<Value>),
}

/// Delivers notifications to every listener registered under their name.
///
/// Delivery follows registration order. A listener that panics is logged and
/// skipped; the others still receive the notification.
#[derive(Default)]
pub struct SubscriptionRouter {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Slot)>>>,
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(name, slots)| (name.as_str(), slots.len()))
            .collect();

        f.debug_struct("SubscriptionRouter")
            .field("listeners", &counts)
            .finish_non_exhaustive()
    }
}

impl SubscriptionRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for notifications named `name`.
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.insert(name.into(), Slot::Callback(Arc::new(listener)))
    }

    /// Receive notifications named `name` as a stream.
    ///
    /// The registration is removed on the first delivery after the stream
    /// has been dropped.
    pub fn subscribe(&self, name: impl Into<String>) -> UnboundedReceiverStream<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(name.into(), Slot::Channel(tx));
        UnboundedReceiverStream::new(rx)
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();

        let Some(slots) = listeners.get_mut(name) else {
            return false;
        };

        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        let removed = slots.len() != before;

        if slots.is_empty() {
            listeners.remove(name);
        }

        removed
    }

    /// Remove every listener for `name`. Returns how many were removed.
    pub fn off_all(&self, name: &str) -> usize {
        self.listeners
            .write()
            .remove(name)
            .map_or(0, |slots| slots.len())
    }

    /// Number of listeners registered for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    /// Deliver `params` to every listener for `name`.
    ///
    /// Returns the number of listeners that received it. A notification with
    /// no listeners is not an error.
    pub fn dispatch(&self, name: &str, params: &Value) -> usize {
        // Snapshot so listeners can register or unregister while we deliver.
        let slots = match self.listeners.read().get(name) {
            Some(slots) => slots.clone(),
            None => {
                debug!("No listeners for notification {}", name);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, slot) in slots {
            match slot {
                Slot::Callback(listener) => {
                    match catch_unwind(AssertUnwindSafe(|| listener(params))) {
                        Ok(()) => delivered += 1,
                        Err(_) => error!("Listener for {} panicked; continuing delivery", name),
                    }
                }
                Slot::Channel(sender) => {
                    if sender.send(params.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(id);
                    }
                }
            }
        }

        for id in closed {
            debug!("Removing closed subscription stream for {}", name);
            self.off(name, id);
        }

        delivered
    }

    fn insert(&self, name: String, slot: Slot) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().entry(name).or_default().push((id, slot));
        id
    }
}
