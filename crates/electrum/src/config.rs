//! Client configuration.

use std::time::Duration;

use crate::protocol::LineCodec;

/// Default client name announced in `server.version`.
pub const DEFAULT_CLIENT_NAME: &str = "proven-electrum";

/// Default Electrum protocol version requested in `server.version`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.4";

/// Tunables for [`ElectrumClient`](crate::ElectrumClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Keepalive tick period. A probe is sent on a tick once the client has
    /// been idle for more than half of this.
    pub keepalive_interval: Duration,
    /// How long the liveness probe may take before it counts as failed.
    pub keepalive_probe_timeout: Duration,
    /// Delay between a failed probe forcing the connection closed and the
    /// reconnect attempt.
    pub keepalive_retry_delay: Duration,
    /// Delay between an unexpected close and applying the persistence policy.
    pub reconnect_delay: Duration,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
    /// Longest accepted line in bytes. A longer line from the server closes
    /// the connection; a longer request fails to send. `None` means unbounded.
    pub max_frame_length: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(120),
            keepalive_probe_timeout: Duration::from_secs(60),
            keepalive_retry_delay: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(1),
            event_capacity: 64,
            max_frame_length: None,
        }
    }
}

impl ClientConfig {
    /// Set the connect-phase timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the keepalive period. The probe timeout follows at half the period.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_probe_timeout = interval / 2;
        self
    }

    /// Set the liveness probe timeout.
    #[must_use]
    pub const fn keepalive_probe_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_probe_timeout = timeout;
        self
    }

    /// Set the delay before reconnecting after a failed probe.
    #[must_use]
    pub const fn keepalive_retry_delay(mut self, delay: Duration) -> Self {
        self.keepalive_retry_delay = delay;
        self
    }

    /// Set the delay before the persistence policy runs after a close.
    #[must_use]
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Limit the length of a single line on the wire.
    #[must_use]
    pub const fn max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = Some(max);
        self
    }

    pub(crate) const fn codec(&self) -> LineCodec {
        match self.max_frame_length {
            Some(max) => LineCodec::new().with_max_length(max),
            None => LineCodec::new(),
        }
    }
}

/// Name and protocol version announced to the server.
///
/// Stored on connect and reused verbatim on every reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client name.
    pub client_name: String,
    /// Requested protocol version.
    pub protocol_version: String,
}

impl ClientIdentity {
    /// Build an identity, falling back to the defaults for empty values.
    #[must_use]
    pub fn new(client_name: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        let client_name = client_name.into();
        let protocol_version = protocol_version.into();

        Self {
            client_name: if client_name.is_empty() {
                DEFAULT_CLIENT_NAME.to_string()
            } else {
                client_name
            },
            protocol_version: if protocol_version.is_empty() {
                DEFAULT_PROTOCOL_VERSION.to_string()
            } else {
                protocol_version
            },
        }
    }
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_NAME, DEFAULT_PROTOCOL_VERSION)
    }
}
