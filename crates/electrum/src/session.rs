//! Connection lifecycle and inbound routing for one server.
//!
//! A [`Session`] owns at most one live connection at a time. Each successful
//! [`Session::connect`] starts a new *generation*: a fresh stream, framer and
//! reader task. When that connection ends, for whatever reason, the reader
//! task tears it down exactly once and reports a [`CloseEvent`] to the owner.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, ResponseReceiver};
use crate::error::{Error, FramingError, Result};
use crate::protocol::{Frame, Incoming, LineCodec, Request};
use crate::subscriptions::SubscriptionRouter;
use crate::transport::{BoxedStream, Transport};

type Writer = FramedWrite<WriteHalf<BoxedStream>, LineCodec>;
type Reader = FramedRead<ReadHalf<BoxedStream>, LineCodec>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection. Initial state and the state after any close.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected; requests may be sent.
    Connected,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner closed the connection on purpose.
    Requested,
    /// The server closed the stream.
    EndOfStream,
    /// The stream failed.
    Error(String),
    /// The keepalive probe failed and the connection was forced closed.
    ProbeFailed,
}

impl CloseReason {
    /// Whether the owner asked for this close.
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        matches!(self, Self::Requested)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("closed by client"),
            Self::EndOfStream => f.write_str("closed by server"),
            Self::Error(error) => write!(f, "connection error: {error}"),
            Self::ProbeFailed => f.write_str("keepalive probe failed"),
        }
    }
}

/// Reported once per connection when it has been torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Generation of the connection that closed.
    pub generation: u64,
    /// Why it closed.
    pub reason: CloseReason,
}

/// Close handle for one live connection.
#[derive(Debug, Default)]
struct Link {
    token: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
}

impl Link {
    fn close(&self, reason: CloseReason) {
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }

    fn reason(&self) -> CloseReason {
        self.reason.lock().clone().unwrap_or(CloseReason::Requested)
    }
}

/// State shared between the session and its reader task.
struct Shared {
    dispatcher: Arc<Dispatcher>,
    router: Arc<SubscriptionRouter>,
    status: RwLock<ConnectionStatus>,
    link: Mutex<Option<Arc<Link>>>,
    writer: AsyncMutex<Option<Writer>>,
    generation: AtomicU64,
    closed_tx: mpsc::UnboundedSender<CloseEvent>,
}

/// One logical connection to an Electrum server, reconnectable.
pub struct Session {
    transport: Transport,
    connect_timeout: Duration,
    codec: LineCodec,
    shared: Arc<Shared>,
}

/// Puts a session that is still `Connecting` back to `Disconnected` when the
/// connect future is dropped or fails before the connection is installed.
struct ConnectingGuard<'a> {
    status: &'a RwLock<ConnectionStatus>,
    armed: bool,
}

impl ConnectingGuard<'_> {
    const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut status = self.status.write();
        if *status == ConnectionStatus::Connecting {
            debug!("Connect abandoned, session back to Disconnected");
            *status = ConnectionStatus::Disconnected;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.transport.config().addr())
            .field("status", &self.status())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a disconnected session.
    ///
    /// Returns the session and the receiver on which a [`CloseEvent`] arrives
    /// every time a connection ends. Every connection frames its stream with a
    /// copy of `codec`.
    #[must_use]
    pub fn new(
        transport: Transport,
        connect_timeout: Duration,
        codec: LineCodec,
        dispatcher: Arc<Dispatcher>,
        router: Arc<SubscriptionRouter>,
    ) -> (Self, mpsc::UnboundedReceiver<CloseEvent>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            dispatcher,
            router,
            status: RwLock::new(ConnectionStatus::Disconnected),
            link: Mutex::new(None),
            writer: AsyncMutex::new(None),
            generation: AtomicU64::new(0),
            closed_tx,
        });

        (
            Self {
                transport,
                connect_timeout,
                codec,
                shared,
            },
            closed_rx,
        )
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.read()
    }

    /// Whether requests can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Generation of the most recent connection (0 before the first).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Open a connection and start reading from it.
    ///
    /// Succeeds immediately without doing anything when a connection is
    /// already established or being established. Dropping the returned future
    /// before it completes leaves the session `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the connection cannot be opened, or
    /// [`Error::ConnectionLost`] if the session was closed while connecting.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut status = self.shared.status.write();
            if *status != ConnectionStatus::Disconnected {
                debug!("Connect skipped, session is {:?}", *status);
                return Ok(());
            }
            *status = ConnectionStatus::Connecting;
        }

        let mut guard = ConnectingGuard {
            status: &self.shared.status,
            armed: true,
        };

        let addr = self.transport.config().addr();
        debug!("Connecting to {} over {}", addr, self.transport.config().protocol);

        let stream = self.transport.connect(self.connect_timeout).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        let link = Arc::new(Link::default());

        let generation = {
            let mut writer = self.shared.writer.lock().await;
            let mut status = self.shared.status.write();

            if *status != ConnectionStatus::Connecting {
                debug!("Session closed while connecting to {}", addr);
                return Err(Error::ConnectionLost);
            }

            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *writer = Some(FramedWrite::new(write_half, self.codec.clone()));
            *self.shared.link.lock() = Some(Arc::clone(&link));
            *status = ConnectionStatus::Connected;
            generation
        };
        guard.disarm();

        info!("Connected to {} (generation {})", addr, generation);

        let reader = FramedRead::new(read_half, self.codec.clone());
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.read_loop(generation, link, reader).await;
        });

        Ok(())
    }

    /// Close the connection on purpose.
    ///
    /// Pending requests fail with [`Error::ConnectionLost`]. Returns whether
    /// there was a connection to close.
    pub fn close(&self) -> bool {
        self.force_close(CloseReason::Requested)
    }

    /// Close the connection, reporting `reason` in the resulting
    /// [`CloseEvent`].
    pub fn force_close(&self, reason: CloseReason) -> bool {
        let link = {
            let mut status = self.shared.status.write();
            *status = ConnectionStatus::Disconnected;
            self.shared.link.lock().take()
        };

        self.shared.dispatcher.fail_all();

        match link {
            Some(link) => {
                debug!("Closing connection: {}", reason);
                link.close(reason);
                true
            }
            None => false,
        }
    }

    /// Write a request and return the handle its response will arrive on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without touching the wire unless the
    /// session is connected, or [`Error::Io`] if the write fails.
    pub async fn send(&self, method: &str, params: &[Value]) -> Result<ResponseReceiver> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let dispatcher = &self.shared.dispatcher;
        let (id, rx) = dispatcher.register();

        let bytes = match Request::new(id, method, params).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                dispatcher.cancel(id);
                return Err(e);
            }
        };

        let mut writer = self.shared.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            dispatcher.cancel(id);
            return Err(Error::NotConnected);
        };

        if let Err(e) = sink.send(bytes).await {
            warn!("Failed to write request {} ({}): {}", id, method, e);
            dispatcher.cancel(id);
            return Err(e.into());
        }

        debug!("Sent request {} {}", id, method);
        Ok(rx)
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Session::send`], the server's error payload as
    /// [`Error::Server`], or [`Error::ConnectionLost`] if the connection ends
    /// first.
    pub async fn request(&self, method: &str, params: &[Value]) -> Result<Value> {
        let rx = self.send(method, params).await?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(link) = self.shared.link.lock().take() {
            link.close(CloseReason::Requested);
        }
    }
}

impl Shared {
    async fn read_loop(&self, generation: u64, link: Arc<Link>, mut reader: Reader) {
        let reason = loop {
            tokio::select! {
                biased;

                () = link.token.cancelled() => break link.reason(),
                frame = reader.next() => match frame {
                    Some(Ok(frame)) => self.on_frame(&frame),
                    Some(Err(e)) => {
                        warn!("Stream error on generation {}: {}", generation, e);
                        break CloseReason::Error(e.to_string());
                    }
                    None => {
                        debug!("Stream closed by server (generation {})", generation);
                        break CloseReason::EndOfStream;
                    }
                },
            }
        };

        drop(reader);

        // A close requested while the stream was ending keeps its own reason.
        let reason = if link.token.is_cancelled() {
            link.reason()
        } else {
            reason
        };
        self.teardown(generation, &link, reason).await;
    }

    fn on_frame(&self, frame: &Frame) {
        match Incoming::parse(&frame.body) {
            Ok(Incoming::Response(response)) => match response.correlation_id() {
                Some(id) => {
                    self.dispatcher.resolve(id, response.outcome);
                }
                None => warn!("Received response for unknown request: {}", response.id),
            },
            Ok(Incoming::Notification(notification)) => {
                debug!("Received notification {}", notification.method);
                self.router
                    .dispatch(&notification.method, &notification.params);
            }
            Ok(Incoming::Batch(items)) => {
                warn!(
                    "Dropping frame with {} items: {}",
                    items,
                    FramingError::UnsupportedBatch
                );
            }
            Ok(Incoming::Unrecognized(value)) => {
                warn!("Dropping unrecognized message: {}", value);
            }
            Err(e) => {
                error!("Failed to decode frame of {} bytes: {}", frame.consumed, e);
            }
        }
    }

    async fn teardown(&self, generation: u64, link: &Arc<Link>, reason: CloseReason) {
        let current = {
            let mut writer = self.writer.lock().await;
            let current = self.generation.load(Ordering::SeqCst) == generation;
            if current {
                writer.take();
            }
            current
        };

        if current {
            {
                let mut status = self.status.write();
                if *status == ConnectionStatus::Connected {
                    *status = ConnectionStatus::Disconnected;
                }

                let mut current_link = self.link.lock();
                if current_link
                    .as_ref()
                    .is_some_and(|held| Arc::ptr_eq(held, link))
                {
                    current_link.take();
                }
            }

            self.dispatcher.fail_all();
        }

        info!("Connection closed (generation {}): {}", generation, reason);

        if self
            .closed_tx
            .send(CloseEvent { generation, reason })
            .is_err()
        {
            debug!("Close event for generation {} had no receiver", generation);
        }
    }
}
