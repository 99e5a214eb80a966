//! Peer identity resolution.
//!
//! # Data Flow
//! ```text
//! peer address (ip:port of the accepted connection)
//!     → IdentityClient::lookup (deadline: 2s tunnel / 5s HTTP)
//!     → IdentityResolver::whois (external service, e.g. localapi.rs)
//!     → IdentityRecord | LookupError
//! ```
//!
//! # Design Decisions
//! - Fetched fresh for every connection or request; nothing is cached
//! - Exactly one attempt; the caller decides fail-open or fail-closed
//! - Deadline expiry is reported as an ordinary `LookupError`

#[cfg(unix)]
pub mod localapi;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::resilience::with_deadline;
use crate::BoxError;

/// Verified identity of the peer behind a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Account login, usually an email address.
    pub login_name: String,
    /// Human-readable account name; may be empty.
    pub display_name: String,
    /// Short machine name of the peer node.
    pub computed_node_name: String,
    /// Fully qualified name of the peer node.
    pub node_name: String,
    /// The node was shared in from another network.
    pub is_shared_node: bool,
}

impl IdentityRecord {
    /// Login name up to (excluding) its first `@`; the whole login if it has none.
    pub fn user_name(&self) -> &str {
        self.login_name
            .split_once('@')
            .map_or(self.login_name.as_str(), |(user, _)| user)
    }
}

/// External service that maps a peer address to a verified identity.
///
/// Must be safe to call concurrently and repeatedly.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn whois(&self, peer: SocketAddr) -> Result<IdentityRecord, BoxError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("identity lookup for {peer} timed out after {after:?}")]
    Timeout { peer: SocketAddr, after: Duration },

    #[error("identity lookup for {peer} failed: {source}")]
    Service {
        peer: SocketAddr,
        #[source]
        source: BoxError,
    },
}

/// Bounded-time front end to an [`IdentityResolver`].
#[derive(Clone)]
pub struct IdentityClient {
    resolver: Arc<dyn IdentityResolver>,
}

impl IdentityClient {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve `peer` once, giving up after `timeout`.
    pub async fn lookup(&self, peer: SocketAddr, timeout: Duration) -> Result<IdentityRecord, LookupError> {
        match with_deadline("identity lookup", timeout, self.resolver.whois(peer)).await {
            Ok(Ok(identity)) => Ok(identity),
            Ok(Err(source)) => Err(LookupError::Service { peer, source }),
            Err(elapsed) => Err(LookupError::Timeout {
                peer,
                after: elapsed.after,
            }),
        }
    }
}

impl std::fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityClient").finish_non_exhaustive()
    }
}
