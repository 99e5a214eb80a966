//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::{Json, Router};
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use tsproxy::net::CertificateProvider;
use tsproxy::{BoxError, IdentityRecord, IdentityResolver};

/// A TCP echo backend. The returned counter tracks accepted connections.
pub async fn start_echo_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, accepted)
}

/// What the header-echo backend saw.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct Echoed {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl Echoed {
    /// Single value of `name`, panicking if it was sent more than once.
    pub fn header(&self, name: &str) -> Option<&str> {
        let values = self.headers.get(&name.to_ascii_lowercase())?;
        assert_eq!(values.len(), 1, "{name} sent {} times", values.len());
        Some(values[0].as_str())
    }
}

/// An HTTP backend that answers every request with a JSON description of it.
pub async fn start_header_echo_backend() -> SocketAddr {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echoed> {
        let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &headers {
            seen.entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        Json(Echoed {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: seen,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(echo)).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn alice() -> IdentityRecord {
    IdentityRecord {
        login_name: "alice@example.com".to_string(),
        display_name: "Alice Example".to_string(),
        computed_node_name: "laptop".to_string(),
        node_name: "laptop.example.com.beta.tailscale.net.".to_string(),
        is_shared_node: false,
    }
}

pub fn shared_bob() -> IdentityRecord {
    IdentityRecord {
        login_name: "bob@partner.org".to_string(),
        display_name: "Bob".to_string(),
        computed_node_name: "workstation".to_string(),
        node_name: "workstation.partner.org.beta.tailscale.net.".to_string(),
        is_shared_node: true,
    }
}

/// Resolves every peer to the same identity.
pub struct StaticResolver(pub IdentityRecord);

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn whois(&self, _peer: SocketAddr) -> Result<IdentityRecord, BoxError> {
        Ok(self.0.clone())
    }
}

/// Knows nobody.
pub struct FailingResolver;

#[async_trait]
impl IdentityResolver for FailingResolver {
    async fn whois(&self, peer: SocketAddr) -> Result<IdentityRecord, BoxError> {
        Err(format!("no match for {peer}").into())
    }
}

/// Answers after `delay`.
pub struct SlowResolver {
    pub delay: Duration,
    pub identity: IdentityRecord,
}

#[async_trait]
impl IdentityResolver for SlowResolver {
    async fn whois(&self, _peer: SocketAddr) -> Result<IdentityRecord, BoxError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.identity.clone())
    }
}

/// Self-signed CA plus a leaf for `names`.
pub struct TestPki {
    pub root: CertificateDer<'static>,
    /// Leaf private key followed by the leaf certificate, PEM.
    pub server_pem: Vec<u8>,
}

pub fn test_pki(names: &[&str]) -> TestPki {
    let ca_key = rcgen::KeyPair::generate().unwrap();
    let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = rcgen::KeyPair::generate().unwrap();
    let leaf_params =
        rcgen::CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

    let mut server_pem = leaf_key.serialize_pem().into_bytes();
    server_pem.extend(leaf.pem().into_bytes());
    TestPki {
        root: ca.der().clone(),
        server_pem,
    }
}

/// Serves one PEM bundle and records the server name of every handshake.
pub struct RecordingProvider {
    pem: Vec<u8>,
    refuse: Option<String>,
    pub seen: Mutex<Vec<Option<String>>>,
}

impl RecordingProvider {
    pub fn new(pem: Vec<u8>) -> Self {
        Self {
            pem,
            refuse: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fail handshakes asking for `server_name`.
    pub fn refusing(mut self, server_name: &str) -> Self {
        self.refuse = Some(server_name.to_string());
        self
    }
}

#[async_trait]
impl CertificateProvider for RecordingProvider {
    async fn certificate_pem(&self, server_name: Option<&str>) -> Result<Vec<u8>, BoxError> {
        self.seen.lock().unwrap().push(server_name.map(str::to_owned));
        if server_name.is_some() && server_name == self.refuse.as_deref() {
            return Err("no certificate for this name".into());
        }
        Ok(self.pem.clone())
    }
}

/// Open a TLS connection to `addr` trusting only `root`.
pub async fn tls_connect(
    addr: SocketAddr,
    server_name: &str,
    root: &CertificateDer<'static>,
    alpn: &[&[u8]],
) -> io::Result<TlsStream<TcpStream>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(root.clone()).unwrap();

    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from(server_name.to_string()).unwrap();
    TlsConnector::from(Arc::new(config)).connect(name, tcp).await
}
