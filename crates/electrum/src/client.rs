//! The Electrum client facade.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, ClientIdentity};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::keepalive::{Activity, KeepaliveMonitor, KeepaliveTarget};
use crate::methods::method;
use crate::reconnect::{PersistencePolicy, ReconnectAction, ReconnectPolicy};
use crate::session::{CloseEvent, CloseReason, ConnectionStatus, Session};
use crate::subscriptions::{ListenerId, SubscriptionRouter};
use crate::transport::{Protocol, Transport, TransportConfig};

/// Lifecycle events published by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The byte stream is established.
    Connected,
    /// Version negotiation finished; carries the server's answer.
    Ready {
        /// Result of `server.version`.
        version: Value,
    },
    /// A connect or negotiation attempt failed.
    Error(String),
    /// The connection closed.
    Closed(CloseReason),
    /// A reconnect attempt is starting.
    Reconnecting {
        /// Attempts left after this one.
        remaining: u32,
    },
    /// The retry budget is spent and the exhaustion callback has run.
    RetriesExhausted,
}

/// Persistent client for one Electrum server.
///
/// Cloning is cheap and every clone drives the same connection. The
/// connection is closed once the last clone is dropped.
#[derive(Clone, Debug)]
pub struct ElectrumClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    session: Session,
    router: Arc<SubscriptionRouter>,
    activity: Arc<Activity>,
    keepalive: KeepaliveMonitor,
    policy: ReconnectPolicy,
    identity: RwLock<ClientIdentity>,
    negotiated: RwLock<Option<Value>>,
    connect_lock: AsyncMutex<()>,
    closed_by_caller: AtomicBool,
    /// Highest connection generation whose close has been handed to the policy.
    decided: AtomicU64,
    close_events: Mutex<Option<mpsc::UnboundedReceiver<CloseEvent>>>,
    events: broadcast::Sender<ClientEvent>,
    this: Weak<Inner>,
}

impl ElectrumClient {
    /// Create a client for `host:port` speaking the transport named by
    /// `protocol` (`tcp`, `tls`, `ssl`, `tls-noverify`, `ssl-noverify`).
    ///
    /// Nothing is connected until [`ElectrumClient::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProtocol`](crate::Error::InvalidProtocol) for an
    /// unknown tag, or a TLS setup error.
    pub fn new(host: impl Into<String>, port: u16, protocol: &str) -> Result<Self> {
        let protocol: Protocol = protocol.parse()?;
        Self::with_config(
            TransportConfig::new(host, port, protocol),
            ClientConfig::default(),
        )
    }

    /// Create a client with explicit transport and client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built.
    pub fn with_config(transport: TransportConfig, config: ClientConfig) -> Result<Self> {
        let transport = Transport::new(transport)?;
        let router = Arc::new(SubscriptionRouter::new());
        let (session, close_events) = Session::new(
            transport,
            config.connect_timeout,
            config.codec(),
            Arc::new(Dispatcher::new()),
            Arc::clone(&router),
        );
        let activity = Arc::new(Activity::default());
        let keepalive = KeepaliveMonitor::new(
            config.keepalive_interval,
            config.keepalive_probe_timeout,
            config.keepalive_retry_delay,
            Arc::clone(&activity),
        );
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Arc::new_cyclic(|this| Inner {
            config,
            session,
            router,
            activity,
            keepalive,
            policy: ReconnectPolicy::default(),
            identity: RwLock::new(ClientIdentity::default()),
            negotiated: RwLock::new(None),
            connect_lock: AsyncMutex::new(()),
            closed_by_caller: AtomicBool::new(false),
            decided: AtomicU64::new(0),
            close_events: Mutex::new(Some(close_events)),
            events,
            this: this.clone(),
        });

        Ok(Self { inner })
    }

    /// Connect, start the keepalive and negotiate the protocol version.
    ///
    /// `client_name` and `protocol_version` are stored and reused on every
    /// reconnect; empty values fall back to the defaults. `policy` replaces
    /// the current persistence policy. Returns the server's answer to
    /// `server.version`.
    ///
    /// When already connected this returns the previously negotiated answer
    /// without touching the wire.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or the negotiation error if the server
    /// rejects `server.version`.
    #[instrument(skip(self, policy))]
    pub async fn connect(
        &self,
        client_name: &str,
        protocol_version: &str,
        policy: PersistencePolicy,
    ) -> Result<Value> {
        if let Some(version) = self.inner.cached_version() {
            debug!("Already connected");
            return Ok(version);
        }

        *self.inner.identity.write() = ClientIdentity::new(client_name, protocol_version);
        self.inner.policy.replace(policy);
        self.inner.closed_by_caller.store(false, Ordering::SeqCst);

        self.inner.establish().await
    }

    /// Send `method` with positional `params` and wait for the result.
    ///
    /// There is no request timeout: the call resolves when the response
    /// arrives or the connection is lost.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) if not connected.
    /// - [`Error::Server`](crate::Error::Server) if the server answered with an error.
    /// - [`Error::ConnectionLost`](crate::Error::ConnectionLost) if the
    ///   connection closed first.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.inner.request(method, &params).await
    }

    /// Close the connection for good.
    ///
    /// Stops the keepalive and fails pending requests. Never triggers a
    /// reconnect; call [`ElectrumClient::connect`] to start over.
    pub fn close(&self) {
        info!("Closing client");
        self.inner.closed_by_caller.store(true, Ordering::SeqCst);
        self.inner.keepalive.shutdown();
        self.inner.negotiated.write().take();
        self.inner.session.close();
    }

    /// Apply the persistence policy as if the connection had just closed.
    ///
    /// # Errors
    ///
    /// Returns the error of the reconnect attempt, if one was made and failed.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.apply_policy().await
    }

    /// Register a listener for notifications named `name`.
    ///
    /// Listeners stay registered across reconnects.
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.router.on(name, listener)
    }

    /// Remove one listener.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.router.off(name, id)
    }

    /// Remove every listener for `name`.
    pub fn off_all(&self, name: &str) -> usize {
        self.inner.router.off_all(name)
    }

    /// Receive notifications named `name` as a stream.
    pub fn subscribe(&self, name: impl Into<String>) -> UnboundedReceiverStream<Value> {
        self.inner.router.subscribe(name)
    }

    /// Lifecycle events from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Connection state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.session.status()
    }

    /// Whether requests can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.session.is_connected()
    }

    /// The server's answer to the last successful negotiation.
    #[must_use]
    pub fn negotiated_version(&self) -> Option<Value> {
        self.inner.negotiated.read().clone()
    }

    /// Identity announced on connect.
    #[must_use]
    pub fn identity(&self) -> ClientIdentity {
        self.inner.identity.read().clone()
    }

    /// Reconnect attempts left in the current policy.
    #[must_use]
    pub fn remaining_retries(&self) -> u32 {
        self.inner.policy.remaining()
    }
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    fn cached_version(&self) -> Option<Value> {
        if self.session.is_connected() {
            self.negotiated.read().clone()
        } else {
            None
        }
    }

    async fn request(&self, method: &str, params: &[Value]) -> Result<Value> {
        self.activity.record();
        self.session.request(method, params).await
    }

    /// Connect with the stored identity and negotiate.
    async fn establish(&self) -> Result<Value> {
        let _guard = self.connect_lock.lock().await;

        if let Some(version) = self.cached_version() {
            return Ok(version);
        }

        self.spawn_supervisor();

        if let Err(e) = self.session.connect().await {
            warn!("Connect failed: {}", e);
            self.emit(ClientEvent::Error(e.to_string()));
            return Err(e);
        }
        self.emit(ClientEvent::Connected);

        let target: Weak<dyn KeepaliveTarget> = self.this.clone();
        self.keepalive.start(target);

        let identity = self.identity.read().clone();
        let params = [
            json!(identity.client_name),
            json!(identity.protocol_version),
        ];

        match self.request(method::SERVER_VERSION, &params).await {
            Ok(version) => {
                info!("Negotiated protocol: {}", version);
                *self.negotiated.write() = Some(version.clone());
                self.emit(ClientEvent::Ready {
                    version: version.clone(),
                });
                Ok(version)
            }
            Err(e) => {
                warn!("Version negotiation failed: {}", e);
                self.emit(ClientEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn apply_policy(&self) -> Result<()> {
        match self.policy.next_action() {
            ReconnectAction::Reconnect { remaining } => {
                self.emit(ClientEvent::Reconnecting { remaining });
                match self.establish().await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!("Reconnect failed: {}", e);
                        Err(e)
                    }
                }
            }
            ReconnectAction::Exhausted => {
                self.emit(ClientEvent::RetriesExhausted);
                Ok(())
            }
            ReconnectAction::GiveUp => {
                debug!("No reconnect attempts left");
                Ok(())
            }
        }
    }

    /// Take the reconnect decision for the close of `generation`. Only the
    /// first caller per generation gets it.
    fn claim_close(&self, generation: u64) -> bool {
        self.decided.fetch_max(generation, Ordering::SeqCst) < generation
    }

    fn spawn_supervisor(&self) {
        if let Some(close_events) = self.close_events.lock().take() {
            tokio::spawn(supervise(self.this.clone(), close_events));
        }
    }
}

#[async_trait]
impl KeepaliveTarget for Inner {
    async fn probe(&self) -> Result<()> {
        self.request(method::SERVER_PING, &[]).await.map(drop)
    }

    fn force_close(&self) -> bool {
        self.negotiated.write().take();
        let generation = self.session.generation();
        self.session.force_close(CloseReason::ProbeFailed) && self.claim_close(generation)
    }

    async fn reconnect(&self) -> Result<()> {
        self.apply_policy().await
    }
}

/// Consumes close events for the lifetime of the client.
async fn supervise(client: Weak<Inner>, mut close_events: mpsc::UnboundedReceiver<CloseEvent>) {
    while let Some(event) = close_events.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };

        if event.generation != inner.session.generation() {
            debug!("Ignoring close of stale generation {}", event.generation);
            continue;
        }

        inner.keepalive.stop();
        inner.negotiated.write().take();
        inner.emit(ClientEvent::Closed(event.reason.clone()));

        // Deliberate closes and failed probes are not decided here.
        if matches!(event.reason, CloseReason::Requested | CloseReason::ProbeFailed) {
            continue;
        }

        let delay = inner.config.reconnect_delay;
        drop(inner);
        sleep(delay).await;

        let Some(inner) = client.upgrade() else {
            break;
        };

        if inner.closed_by_caller.load(Ordering::SeqCst)
            || inner.session.generation() != event.generation
            || inner.session.status() != ConnectionStatus::Disconnected
        {
            debug!("Connection state changed while waiting, not reconnecting");
            continue;
        }

        if !inner.claim_close(event.generation) {
            debug!("Close of generation {} already handled", event.generation);
            continue;
        }

        // Errors are logged by reconnect itself and do not re-enter the policy.
        let _ = inner.apply_policy().await;
    }

    debug!("Client supervisor stopped");
}
