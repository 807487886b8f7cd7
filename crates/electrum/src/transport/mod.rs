//! Byte-stream transports: plain TCP and TLS over TCP.
//!
//! The transport only knows how to hand back a connected, optionally
//! encrypted, byte stream. Everything above it (framing, routing, lifecycle)
//! lives in the session.

mod tls;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};

pub use tls::TlsOptions;

/// Any connected byte stream the session can split into halves.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased connected stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Transport protocol selected by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain TCP (`tcp`).
    Tcp,
    /// TLS with certificate verification against the webpki roots (`tls`, `ssl`).
    Tls,
    /// TLS without certificate verification (`tls-noverify`, `ssl-noverify`).
    /// Many Electrum servers use self-signed certificates.
    TlsNoVerify,
}

impl Protocol {
    /// Whether the stream is wrapped in TLS.
    #[must_use]
    pub const fn is_tls(self) -> bool {
        matches!(self, Self::Tls | Self::TlsNoVerify)
    }

    /// Canonical tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "tls",
            Self::TlsNoVerify => "tls-noverify",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "tcp" => Ok(Self::Tcp),
            "tls" | "ssl" => Ok(Self::Tls),
            "tls-noverify" | "ssl-noverify" => Ok(Self::TlsNoVerify),
            other => Err(Error::InvalidProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// TLS options, ignored for plain TCP.
    pub tls: TlsOptions,
}

impl TransportConfig {
    /// Create a configuration with default TLS options.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            tls: TlsOptions::default(),
        }
    }

    /// Use the given TLS options.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// `host:port`, for logs and errors.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connects byte streams for one server.
///
/// TLS material is prepared once at construction so that configuration
/// mistakes surface before the first connect.
#[derive(Clone)]
pub struct Transport {
    config: TransportConfig,
    tls: Option<tls::Handshake>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Transport {
    /// Prepare a transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built or the host
    /// is not a valid TLS server name.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let tls = if config.protocol.is_tls() {
            Some(tls::Handshake::new(&config)?)
        } else {
            None
        };

        Ok(Self { config, tls })
    }

    /// Transport configuration.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open a new connection.
    ///
    /// `connect_timeout` bounds the TCP connect and the TLS handshake
    /// together. It does not apply to the connection once established.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectTimeout`] if the connect phase does not finish
    /// in time, or [`Error::ConnectFailed`] if it fails.
    pub async fn connect(&self, connect_timeout: Duration) -> Result<BoxedStream> {
        timeout(connect_timeout, self.connect_inner())
            .await
            .map_err(|_| Error::ConnectTimeout(connect_timeout))?
    }

    async fn connect_inner(&self) -> Result<BoxedStream> {
        let addr = self.config.addr();
        let connect_failed = |source: io::Error| Error::ConnectFailed {
            addr: addr.clone(),
            source,
        };

        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(connect_failed)?;
        configure_socket(&stream).map_err(connect_failed)?;

        debug!("TCP connection established to {}", addr);

        match &self.tls {
            None => Ok(Box::new(stream)),
            Some(handshake) => {
                let stream = handshake.connect(stream).await.map_err(connect_failed)?;
                debug!("TLS handshake completed with {}", addr);
                Ok(Box::new(stream))
            }
        }
    }
}

/// Keepalive at the OS level and no Nagle delay: requests are small and
/// latency sensitive.
fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}
