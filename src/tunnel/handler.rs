//! Per-connection tunnel handling.
//!
//! ```text
//! Accepted → IdentityResolving ─┬─ Authorized → Dialing ─┬─ Relaying → Closed
//!                               │                         └─ DialFailed → Closed
//!                               └─ IdentityFailed → Closed
//! ```
//!
//! No identity, no dial: a failed lookup closes the inbound stream before the
//! backend is ever contacted. The listener calls [`TunnelHandler::authorize`]
//! on the raw TCP stream and only completes TLS for peers it returns.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::relay::{relay, RelayOutcome};
use crate::identity::{IdentityClient, IdentityRecord, LookupError};
use crate::net::{BackendTarget, ConnectionId};

/// Terminal state of one tunnel connection.
#[derive(Debug)]
pub enum TunnelOutcome {
    IdentityFailed(LookupError),
    DialFailed(io::Error),
    Relayed {
        identity: IdentityRecord,
        relay: RelayOutcome,
    },
}

/// Authorizes and relays raw connections to the backend.
#[derive(Debug, Clone)]
pub struct TunnelHandler {
    identity: IdentityClient,
    backend: Arc<BackendTarget>,
    lookup_timeout: Duration,
    connect_timeout: Duration,
}

impl TunnelHandler {
    pub fn new(
        identity: IdentityClient,
        backend: Arc<BackendTarget>,
        lookup_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            backend,
            lookup_timeout,
            connect_timeout,
        }
    }

    /// Drive one accepted connection to completion.
    ///
    /// `inbound` is dropped (closing it) on every path out of this function.
    pub async fn handle<S>(&self, inbound: S, remote_addr: SocketAddr, id: ConnectionId) -> TunnelOutcome
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        match self.authorize(remote_addr, id).await {
            Ok(identity) => self.forward(inbound, identity, remote_addr, id).await,
            Err(error) => TunnelOutcome::IdentityFailed(error),
        }
    }

    /// Look up the peer behind `remote_addr`.
    ///
    /// Runs before any TLS work so unknown peers cost one lookup and nothing else.
    pub async fn authorize(&self, remote_addr: SocketAddr, id: ConnectionId) -> Result<IdentityRecord, LookupError> {
        let identity = match self.identity.lookup(remote_addr, self.lookup_timeout).await {
            Ok(identity) => identity,
            Err(error) => {
                tracing::warn!(
                    connection_id = %id,
                    remote_addr = %remote_addr,
                    error = %error,
                    "Identity lookup failed, closing connection"
                );
                return Err(error);
            }
        };

        tracing::info!(
            connection_id = %id,
            remote_addr = %remote_addr,
            login_name = %identity.login_name,
            node_name = %identity.node_name,
            "Connection established"
        );
        Ok(identity)
    }

    /// Dial the backend for an authorized peer and relay until both sides close.
    pub async fn forward<S>(
        &self,
        inbound: S,
        identity: IdentityRecord,
        remote_addr: SocketAddr,
        id: ConnectionId,
    ) -> TunnelOutcome
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let backend = match self.backend.dial(self.connect_timeout).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(
                    connection_id = %id,
                    remote_addr = %remote_addr,
                    backend = %self.backend,
                    error = %error,
                    "Could not establish backend connection"
                );
                return TunnelOutcome::DialFailed(error);
            }
        };

        let outcome = relay(inbound, backend).await;
        match &outcome.error {
            Some(error) => tracing::debug!(
                connection_id = %id,
                direction = %outcome.first_closed,
                error = %error,
                "Relay ended with error"
            ),
            None => tracing::debug!(
                connection_id = %id,
                direction = %outcome.first_closed,
                bytes = outcome.bytes,
                "Relay finished"
            ),
        }

        TunnelOutcome::Relayed {
            identity,
            relay: outcome,
        }
    }
}
