//! Identity-aware TLS proxy for an overlay network.
//!
//! Accepts TLS connections on the node's overlay addresses, asks the overlay
//! daemon who is on the other end, and forwards to a local backend either as
//! a raw byte tunnel or as an HTTP reverse proxy carrying identity headers.

// Core subsystems
pub mod config;
pub mod http;
pub mod identity;
pub mod net;
pub mod tunnel;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

/// Error type at trait boundaries to external services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::schema::{ProxyConfig, ProxyMode};
pub use http::HttpServer;
pub use identity::{IdentityClient, IdentityRecord, IdentityResolver, LookupError};
pub use lifecycle::{Proxy, Shutdown};
pub use net::BackendTarget;
pub use tunnel::TunnelHandler;
