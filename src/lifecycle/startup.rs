//! Startup orchestration.
//!
//! # Responsibilities
//! - Prepare the node's state directory and find the overlay daemon
//! - Join the overlay network and discover the addresses to listen on
//! - Build the identity client, certificate provider and mode handler
//! - Bind listeners and run one accept loop per address
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - After startup, per-connection failures are logged and never stop the process

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::InvalidHeaderName;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use super::shutdown::{notified, Shutdown};
use crate::config::{ProxyConfig, ProxyMode};
use crate::http::{AppState, Director, HttpServer};
use crate::identity::{IdentityClient, IdentityResolver};
use crate::net::{
    BackendTarget, CertificateProvider, ConnectionId, ConnectionTracker, Listener, ListenerError,
    StaticCertificate, TlsTerminator, HTTP_ALPN,
};
use crate::tunnel::TunnelHandler;

/// Name of the daemon socket inside a node's state directory.
pub const STATE_SOCKET_NAME: &str = "tailscaled.sock";

/// Error type for startup failures. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no user config directory available for node state")]
    NoConfigDir,

    #[error("failed to prepare state directory {}: {source}", .path.display())]
    StateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to join the overlay network: {0}")]
    Join(#[source] crate::BoxError),

    #[error("overlay node has no addresses to listen on")]
    NoAddresses,

    #[error("invalid bind address {0:?}")]
    BindAddress(String),

    #[error("TLS certificate: {0}")]
    Certificate(#[source] io::Error),

    #[error("invalid header name: {0}")]
    HeaderName(#[from] InvalidHeaderName),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("the overlay daemon is only reachable over unix domain sockets")]
    Unsupported,
}

/// Directory holding this node's state: the configured one, or
/// `<user config dir>/tsproxy-<node name>`.
pub fn state_dir(config: &ProxyConfig) -> Result<PathBuf, StartupError> {
    if let Some(dir) = &config.overlay.state_dir {
        return Ok(dir.clone());
    }
    let base = dirs::config_dir().ok_or(StartupError::NoConfigDir)?;
    Ok(base.join(format!("tsproxy-{}", config.node_name)))
}

/// Create `dir` (owner-only on unix) if it does not exist yet.
pub fn prepare_state_dir(dir: &Path) -> Result<(), StartupError> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| StartupError::StateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Overlay daemon socket: explicit setting, then the node's own daemon, then
/// the system daemon.
pub fn localapi_socket(config: &ProxyConfig, state_dir: &Path) -> PathBuf {
    if let Some(socket) = &config.overlay.localapi_socket {
        return socket.clone();
    }
    let node_socket = state_dir.join(STATE_SOCKET_NAME);
    if node_socket.exists() {
        return node_socket;
    }
    PathBuf::from(SYSTEM_SOCKET)
}

#[cfg(unix)]
const SYSTEM_SOCKET: &str = crate::identity::localapi::DEFAULT_SOCKET;
#[cfg(not(unix))]
const SYSTEM_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";

/// Addresses to bind: the configured ones, else every overlay address.
pub fn listen_addresses(config: &ProxyConfig, overlay_ips: &[IpAddr]) -> Result<Vec<SocketAddr>, StartupError> {
    let port = config.listener.port;
    let ips = if config.listener.bind_addresses.is_empty() {
        overlay_ips.to_vec()
    } else {
        config
            .listener
            .bind_addresses
            .iter()
            .map(|raw| raw.parse::<IpAddr>().map_err(|_| StartupError::BindAddress(raw.clone())))
            .collect::<Result<Vec<_>, _>>()?
    };

    if ips.is_empty() {
        return Err(StartupError::NoAddresses);
    }
    Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect())
}

/// What to do with a TLS stream once the handshake is done.
#[derive(Clone)]
pub enum ConnectionHandler {
    Tunnel(TunnelHandler),
    Http(HttpServer),
}

impl ConnectionHandler {
    pub fn from_config(
        config: &ProxyConfig,
        identity: IdentityClient,
        backend: Arc<BackendTarget>,
    ) -> Result<Self, StartupError> {
        let connect_timeout = config.timeouts.connect();
        Ok(match config.mode {
            ProxyMode::Tunnel => ConnectionHandler::Tunnel(TunnelHandler::new(
                identity,
                backend,
                config.identity.tunnel_lookup_timeout(),
                connect_timeout,
            )),
            ProxyMode::Http => {
                let director = Director::from_config(&config.headers, &config.identity, backend)?;
                ConnectionHandler::Http(HttpServer::new(AppState {
                    director: Arc::new(director),
                    identity,
                    lookup_timeout: config.identity.http_lookup_timeout(),
                    connect_timeout,
                }))
            }
        })
    }

    fn alpn(&self) -> &'static [&'static [u8]] {
        match self {
            ConnectionHandler::Tunnel(_) => &[],
            ConnectionHandler::Http(_) => HTTP_ALPN,
        }
    }
}

/// A bound, ready-to-run proxy.
pub struct Proxy {
    listeners: Vec<Listener>,
    tls: TlsTerminator,
    handler: ConnectionHandler,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl Proxy {
    /// Full startup against the local overlay daemon.
    #[cfg(unix)]
    pub async fn bootstrap(config: &ProxyConfig) -> Result<Self, StartupError> {
        use crate::identity::localapi::LocalApiClient;

        let dir = state_dir(config)?;
        prepare_state_dir(&dir)?;
        let socket = localapi_socket(config, &dir);
        tracing::info!(state_dir = %dir.display(), socket = %socket.display(), "Using overlay daemon");

        let client = Arc::new(LocalApiClient::new(socket));
        let status = client
            .join(
                &config.node_name,
                config.overlay.auth_key.as_deref(),
                config.overlay.join_timeout(),
            )
            .await
            .map_err(|error| StartupError::Join(error.into()))?;
        tracing::info!(
            node_name = %config.node_name,
            addresses = ?status.tailscale_ips,
            cert_domains = ?status.cert_domains,
            "Joined overlay network"
        );

        let certificates: Arc<dyn CertificateProvider> = match &config.listener.tls {
            Some(tls) => {
                let files = StaticCertificate::new(&tls.cert_path, &tls.key_path);
                files.check().map_err(StartupError::Certificate)?;
                Arc::new(files)
            }
            None => client.clone(),
        };

        let addrs = listen_addresses(config, &status.tailscale_ips)?;
        Self::bind(config, client, certificates, &addrs).await
    }

    #[cfg(not(unix))]
    pub async fn bootstrap(_config: &ProxyConfig) -> Result<Self, StartupError> {
        Err(StartupError::Unsupported)
    }

    /// Wire up the handler for `config.mode` and bind every address in `addrs`.
    pub async fn bind(
        config: &ProxyConfig,
        resolver: Arc<dyn IdentityResolver>,
        certificates: Arc<dyn CertificateProvider>,
        addrs: &[SocketAddr],
    ) -> Result<Self, StartupError> {
        let backend = Arc::new(BackendTarget::resolve(&config.backend));
        let handler = ConnectionHandler::from_config(config, IdentityClient::new(resolver), backend.clone())?;
        let tls = TlsTerminator::new(certificates, handler.alpn(), config.listener.handshake_timeout());

        let connection_limit = Arc::new(Semaphore::new(config.listener.max_connections));
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            listeners.push(Listener::bind(*addr, connection_limit.clone()).await?);
        }

        tracing::info!(
            mode = %config.mode,
            backend = %backend,
            listeners = listeners.len(),
            max_connections = config.listener.max_connections,
            "Proxy ready"
        );

        Ok(Self {
            listeners,
            tls,
            handler,
            tracker: ConnectionTracker::new(),
            drain_timeout: config.listener.drain_timeout(),
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().filter_map(|l| l.local_addr().ok()).collect()
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// Returns the number of connections still open when the drain deadline passed.
    pub async fn run(self, shutdown: Shutdown) -> u64 {
        let mut stop = shutdown.subscribe();
        let mut accept_loops = JoinSet::new();

        for listener in self.listeners {
            accept_loops.spawn(accept_loop(
                listener,
                self.tls.clone(),
                self.handler.clone(),
                self.tracker.clone(),
                shutdown.clone(),
                shutdown.subscribe(),
            ));
        }

        // Every receiver exists now; a trigger that came earlier is only visible here.
        if shutdown.is_triggered() {
            accept_loops.abort_all();
        } else {
            let _ = stop.recv().await;
        }
        tracing::info!("Shutdown signal received, no longer accepting connections");
        while accept_loops.join_next().await.is_some() {}

        let remaining = self.tracker.drain(self.drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain deadline passed with connections still open");
        } else {
            tracing::info!("All connections drained");
        }
        remaining
    }
}

async fn accept_loop(
    listener: Listener,
    tls: TlsTerminator,
    handler: ConnectionHandler,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(ListenerError::Closed) => break,
            Err(error) => {
                tracing::warn!(%error, "Accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let guard = tracker.track();
        let tls = tls.clone();
        let handler = handler.clone();
        let stop = shutdown.subscribe();
        tokio::spawn(async move {
            serve_connection(stream, remote_addr, guard.id(), tls, handler, stop).await;
            drop(permit);
            drop(guard);
        });
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    id: ConnectionId,
    tls: TlsTerminator,
    handler: ConnectionHandler,
    stop: broadcast::Receiver<()>,
) {
    match handler {
        ConnectionHandler::Tunnel(tunnel) => {
            let Ok(identity) = tunnel.authorize(remote_addr, id).await else {
                return;
            };
            if let Some(stream) = handshake(&tls, stream, remote_addr, id).await {
                tunnel.forward(stream, identity, remote_addr, id).await;
            }
        }
        ConnectionHandler::Http(server) => {
            let Some(stream) = handshake(&tls, stream, remote_addr, id).await else {
                return;
            };
            if let Err(error) = server.serve_connection(stream, remote_addr, notified(stop)).await {
                tracing::debug!(connection_id = %id, remote_addr = %remote_addr, %error, "HTTP connection error");
            }
        }
    }
}

async fn handshake(
    tls: &TlsTerminator,
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    id: ConnectionId,
) -> Option<tokio_rustls::server::TlsStream<tokio::net::TcpStream>> {
    match tls.accept(stream).await {
        Ok(stream) => Some(stream),
        Err(error) => {
            tracing::debug!(connection_id = %id, remote_addr = %remote_addr, %error, "TLS handshake failed");
            None
        }
    }
}
