//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How accepted connections are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Raw byte tunnel to the backend socket.
    #[default]
    Tunnel,
    /// HTTP reverse proxy with identity headers.
    Http,
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Tunnel => f.write_str("tunnel"),
            ProxyMode::Http => f.write_str("http"),
        }
    }
}

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Tunnel or HTTP mode.
    pub mode: ProxyMode,

    /// Local backend to proxy connections to: an absolute socket path or `host:port`.
    pub backend: String,

    /// Node name to register on the overlay network.
    pub node_name: String,

    /// Listener configuration (port, TLS, limits).
    pub listener: ListenerConfig,

    /// Names of the identity headers injected in HTTP mode.
    pub headers: HeaderConfig,

    /// Identity lookup settings.
    pub identity: IdentityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Overlay daemon settings.
    pub overlay: OverlayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::default(),
            backend: String::new(),
            node_name: "aproxy".to_string(),
            listener: ListenerConfig::default(),
            headers: HeaderConfig::default(),
            identity: IdentityConfig::default(),
            timeouts: TimeoutConfig::default(),
            overlay: OverlayConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port to accept TLS connections on.
    pub port: u16,

    /// Explicit bind addresses (IP only). Empty means every overlay address.
    pub bind_addresses: Vec<String>,

    /// Static certificate files. When absent, certificates come from the overlay daemon.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// TLS handshake timeout in seconds.
    pub handshake_timeout_secs: u64,

    /// Grace period for in-flight connections on shutdown, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 443,
            bind_addresses: Vec::new(),
            tls: None,
            max_connections: 10_000,
            handshake_timeout_secs: 10,
            drain_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Identity header names. Each one is a plain substitutable string.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Receives the caller's login name.
    pub email: String,

    /// Receives the login name up to its first `@`.
    pub user: String,

    /// Receives the caller's network (tailnet) name.
    pub network: String,

    /// Receives the caller's display name.
    pub name: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            email: "X-Webauth-Email".to_string(),
            user: "X-Webauth-User".to_string(),
            network: "X-Webauth-Network".to_string(),
            name: "X-Webauth-Name".to_string(),
        }
    }
}

/// Identity lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Lookup deadline for tunnel connections, in milliseconds.
    pub tunnel_lookup_timeout_ms: u64,

    /// Lookup deadline for HTTP requests, in milliseconds.
    pub http_lookup_timeout_ms: u64,

    /// Trailing domain stripped from node names when deriving the network name.
    pub network_suffix: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            tunnel_lookup_timeout_ms: 2_000,
            http_lookup_timeout_ms: 5_000,
            network_suffix: ".beta.tailscale.net".to_string(),
        }
    }
}

impl IdentityConfig {
    pub fn tunnel_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.tunnel_lookup_timeout_ms)
    }

    pub fn http_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.http_lookup_timeout_ms)
    }
}

/// Timeout configuration for backend operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_secs: 10 }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

/// Overlay daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Local API socket of the overlay daemon. Derived from `state_dir` when unset.
    pub localapi_socket: Option<PathBuf>,

    /// Pre-shared key used to log the node in headlessly.
    pub auth_key: Option<String>,

    /// Per-node state directory. Defaults to `<config dir>/tsproxy-<node_name>`.
    pub state_dir: Option<PathBuf>,

    /// How long to wait for the node to come up after login, in seconds.
    pub join_timeout_secs: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            localapi_socket: None,
            auth_key: None,
            state_dir: None,
            join_timeout_secs: 30,
        }
    }
}

impl OverlayConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}
