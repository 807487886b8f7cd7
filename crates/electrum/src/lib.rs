//! Persistent Electrum / ElectrumX client.
//!
//! Electrum servers speak line-delimited JSON-RPC over plain TCP or TLS. This
//! crate keeps one long-lived connection to a server and multiplexes
//! concurrent requests over it, routes server-pushed notifications to
//! listeners, probes idle connections and reconnects within a retry budget.
//!
//! # Features
//!
//! - **Multiplexing**: Any number of concurrent requests share one socket;
//!   responses are matched by id, whatever order they arrive in
//! - **Notifications**: Callback listeners or streams per notification name
//! - **Keepalive**: `server.ping` after half a period of idleness
//! - **Persistence**: Bounded reconnects after unexpected closes
//! - **TLS**: rustls with webpki roots, or unverified for self-signed servers
//!
//! Every request resolves exactly once: with the result, with the server's
//! error, or with [`Error::ConnectionLost`] when the connection goes away
//! first.
//!
//! # Example
//!
//! ```no_run
//! use proven_electrum::{ElectrumClient, PersistencePolicy};
//! use tokio_stream::StreamExt;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ElectrumClient::new("electrum.blockstream.info", 50002, "tls")?;
//!
//!     let version = client
//!         .connect("my-wallet", "1.4", PersistencePolicy::default())
//!         .await?;
//!     println!("server: {version}");
//!
//!     let mut headers = client.subscribe("blockchain.headers.subscribe");
//!     let tip = client.headers_subscribe().await?;
//!     println!("tip: {tip}");
//!
//!     while let Some(params) = headers.next().await {
//!         println!("new tip: {params}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod keepalive;
pub mod methods;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod subscriptions;
pub mod transport;

// Re-export commonly used types
pub use client::{ClientEvent, ElectrumClient};
pub use config::{ClientConfig, ClientIdentity, DEFAULT_CLIENT_NAME, DEFAULT_PROTOCOL_VERSION};
pub use error::{Error, FramingError, Result, ServerError};
pub use methods::method;
pub use reconnect::{PersistencePolicy, ReconnectAction};
pub use session::{CloseReason, ConnectionStatus};
pub use subscriptions::ListenerId;
pub use transport::{Protocol, TlsOptions, TransportConfig};

// Re-export dependencies that are part of our public API
pub use serde_json::Value;
