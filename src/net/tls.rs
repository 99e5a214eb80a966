//! TLS termination with per-connection certificates.
//!
//! The ClientHello is read first so the requested server name can be handed
//! to a [`CertificateProvider`]; the handshake then completes with whatever
//! certificate the provider returned. A provider failure aborts that one
//! handshake only.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::Acceptor;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::resilience::{with_deadline, Elapsed};
use crate::BoxError;

/// ALPN protocols offered in HTTP mode.
pub const HTTP_ALPN: &[&[u8]] = &[b"h2", b"http/1.1"];

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("reading client hello: {0}")]
    ClientHello(#[source] io::Error),

    #[error("no certificate for {server_name:?}: {source}")]
    Certificate {
        server_name: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("invalid certificate material: {0}")]
    Pem(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error("handshake: {0}")]
    Handshake(#[source] io::Error),

    #[error(transparent)]
    Timeout(#[from] Elapsed),
}

/// Supplies a PEM bundle (private key plus certificate chain) per handshake.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    /// `server_name` is the SNI from the ClientHello, if the client sent one.
    async fn certificate_pem(&self, server_name: Option<&str>) -> Result<Vec<u8>, BoxError>;
}

/// Serves the same certificate and key files for every handshake.
#[derive(Debug, Clone)]
pub struct StaticCertificate {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl StaticCertificate {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Check both files exist so a typo fails at startup rather than on first handshake.
    pub fn check(&self) -> Result<(), io::Error> {
        for path in [&self.cert_path, &self.key_path] {
            if !path.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("TLS file not found: {}", path.display()),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateProvider for StaticCertificate {
    async fn certificate_pem(&self, _server_name: Option<&str>) -> Result<Vec<u8>, BoxError> {
        let mut pem = tokio::fs::read(&self.key_path).await?;
        pem.push(b'\n');
        pem.extend(tokio::fs::read(&self.cert_path).await?);
        Ok(pem)
    }
}

/// Build a server config from a PEM bundle holding a private key and a certificate chain.
pub fn server_config_from_pem(pem: &[u8], alpn: &[&[u8]]) -> Result<ServerConfig, TlsError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| TlsError::Pem(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::Pem("no certificate found".to_string()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::Pem(e.to_string()))?
        .ok_or_else(|| TlsError::Pem("no private key found".to_string()))?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

/// Terminates TLS on accepted connections.
#[derive(Clone)]
pub struct TlsTerminator {
    provider: Arc<dyn CertificateProvider>,
    alpn: Vec<&'static [u8]>,
    handshake_timeout: Duration,
}

impl TlsTerminator {
    pub fn new(
        provider: Arc<dyn CertificateProvider>,
        alpn: &[&'static [u8]],
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            alpn: alpn.to_vec(),
            handshake_timeout,
        }
    }

    /// Run the whole handshake (including certificate retrieval) under the handshake deadline.
    pub async fn accept<IO>(&self, io: IO) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        with_deadline("tls handshake", self.handshake_timeout, self.handshake(io)).await?
    }

    async fn handshake<IO>(&self, io: IO) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(Acceptor::default(), io)
            .await
            .map_err(TlsError::ClientHello)?;

        let server_name = start.client_hello().server_name().map(str::to_owned);
        let pem = self
            .provider
            .certificate_pem(server_name.as_deref())
            .await
            .map_err(|source| TlsError::Certificate {
                server_name: server_name.clone(),
                source,
            })?;
        let config = server_config_from_pem(&pem, &self.alpn)?;

        tracing::trace!(server_name = ?server_name, "Certificate selected");

        start
            .into_stream(Arc::new(config))
            .await
            .map_err(TlsError::Handshake)
    }
}
