//! TLS client setup on top of `tokio-rustls`.

use std::io;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::{Protocol, TransportConfig};
use crate::error::{Error, Result};

/// TLS options passed through to rustls.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Fully custom client configuration (certificates, ALPN, ...). When set
    /// it is used as is and the protocol's verification mode is ignored.
    pub client_config: Option<Arc<ClientConfig>>,
    /// Server name to present via SNI and verify against, instead of the host.
    pub server_name: Option<String>,
}

/// Prepared connector plus the name we verify the peer against.
#[derive(Clone)]
pub(super) struct Handshake {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl Handshake {
    pub(super) fn new(config: &TransportConfig) -> Result<Self> {
        let client_config = match &config.tls.client_config {
            Some(client_config) => Arc::clone(client_config),
            None => Arc::new(client_config(config.protocol)?),
        };

        let name = config.tls.server_name.as_deref().unwrap_or(&config.host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| Error::InvalidServerName(format!("{name}: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(client_config),
            server_name,
        })
    }

    pub(super) async fn connect(&self, stream: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
    }
}

fn client_config(protocol: Protocol) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let config = if protocol == Protocol::TlsNoVerify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(config)
}

/// Skips certificate chain and name checks. Handshake signatures are still
/// verified so the session keys belong to whoever presented the certificate.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
