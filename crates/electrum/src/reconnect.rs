//! Bounded-retry reconnection.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

/// Called once when the retry budget has run out.
pub type ExhaustedCallback = Arc<dyn Fn() + Send + Sync>;

/// Default retry budget.
pub const DEFAULT_MAX_RETRY: u32 = 10;

/// How hard to try to stay connected after unexpected closes.
#[derive(Clone)]
pub struct PersistencePolicy {
    /// Reconnect attempts left.
    pub max_retry: u32,
    /// Invoked once the budget is spent and another close arrives.
    pub on_exhausted: Option<ExhaustedCallback>,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            on_exhausted: None,
        }
    }
}

impl fmt::Debug for PersistencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistencePolicy")
            .field("max_retry", &self.max_retry)
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}

impl PersistencePolicy {
    /// Policy with `max_retry` attempts and no callback.
    #[must_use]
    pub const fn new(max_retry: u32) -> Self {
        Self {
            max_retry,
            on_exhausted: None,
        }
    }

    /// Never reconnect.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0)
    }

    /// Set the exhaustion callback.
    #[must_use]
    pub fn on_exhausted<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(callback));
        self
    }
}

/// Decision taken for one close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Reconnect; `remaining` attempts are left afterwards.
    Reconnect {
        /// Attempts left after this one.
        remaining: u32,
    },
    /// The budget ran out and the exhaustion callback was invoked.
    Exhausted,
    /// Nothing left to do; stay disconnected.
    GiveUp,
}

#[derive(Debug, Default)]
struct State {
    policy: PersistencePolicy,
    exhausted: bool,
}

/// Applies a [`PersistencePolicy`] to successive close events.
#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    state: Mutex<State>,
}

impl ReconnectPolicy {
    /// Create a controller for `policy`.
    #[must_use]
    pub fn new(policy: PersistencePolicy) -> Self {
        Self {
            state: Mutex::new(State {
                policy,
                exhausted: false,
            }),
        }
    }

    /// Install a fresh policy, resetting the budget and the callback.
    pub fn replace(&self, policy: PersistencePolicy) {
        debug!("Persistence policy set to {:?}", policy);
        *self.state.lock() = State {
            policy,
            exhausted: false,
        };
    }

    /// Attempts left.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.state.lock().policy.max_retry
    }

    /// Decide what to do about one close event.
    ///
    /// Spends one attempt while any are left, then fires the exhaustion
    /// callback once, then gives up on every later call.
    pub fn next_action(&self) -> ReconnectAction {
        let callback = {
            let mut state = self.state.lock();

            if state.policy.max_retry > 0 {
                state.policy.max_retry -= 1;
                let remaining = state.policy.max_retry;
                info!("Reconnecting ({} attempts left)", remaining);
                return ReconnectAction::Reconnect { remaining };
            }

            if state.exhausted {
                return ReconnectAction::GiveUp;
            }

            match state.policy.on_exhausted.clone() {
                Some(callback) => {
                    state.exhausted = true;
                    callback
                }
                None => return ReconnectAction::GiveUp,
            }
        };

        info!("Reconnect attempts exhausted");
        // Invoked outside the lock so the callback may call back into us.
        callback();
        ReconnectAction::Exhausted
    }
}
