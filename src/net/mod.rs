//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection on an overlay address
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (ClientHello → certificate provider → handshake)
//!     → connection.rs (connection id, in-flight tracking)
//!     → Hand off to tunnel handler or HTTP layer
//!     → backend.rs (fresh dial to the local backend)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - The proxy is the TLS boundary; the backend hop is plain text

pub mod backend;
pub mod connection;
pub mod listener;
pub mod tls;

pub use backend::{BackendStream, BackendTarget, Transport};
pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use tls::{CertificateProvider, StaticCertificate, TlsError, TlsTerminator, HTTP_ALPN};
