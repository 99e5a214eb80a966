//! Bidirectional byte relay between two streams.
//!
//! The client-to-backend direction runs on its own task, the other in the
//! caller. When one direction reaches end-of-stream its destination's write
//! half is shut down and the other direction keeps draining, for at most the
//! grace period, so half-closed connections still deliver what the peer sent.
//! An I/O error in either direction ends both at once. Both copies are
//! finished or cancelled before `relay` returns.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// How long the surviving direction may keep running after the other one ends.
pub const HALF_CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Direction of a relay copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// How a relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The direction whose copy finished first.
    pub first_closed: Direction,
    /// Bytes moved by that direction.
    pub bytes: u64,
    /// Set when that direction stopped on an I/O error rather than end-of-stream.
    pub error: Option<io::Error>,
}

impl RelayOutcome {
    fn from_copy(first_closed: Direction, result: io::Result<u64>) -> Self {
        match result {
            Ok(bytes) => Self {
                first_closed,
                bytes,
                error: None,
            },
            Err(error) => Self {
                first_closed,
                bytes: 0,
                error: Some(error),
            },
        }
    }
}

/// Relay bytes between `client` and `backend` with the default [`HALF_CLOSE_GRACE`].
pub async fn relay<C, B>(client: C, backend: B) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    relay_with_grace(client, backend, HALF_CLOSE_GRACE).await
}

/// Relay bytes between `client` and `backend` until both directions end.
///
/// After the first direction ends cleanly the other gets `grace` to reach its
/// own end-of-stream before it is cut off.
pub async fn relay_with_grace<C, B>(client: C, backend: B, grace: Duration) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let mut upstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut client_read, &mut backend_write).await;
        let _ = backend_write.shutdown().await;
        copied
    });

    let downstream = async {
        let copied = tokio::io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    };
    tokio::pin!(downstream);

    let outcome = tokio::select! {
        joined = &mut upstream => {
            let copied = joined.unwrap_or_else(|e| Err(io::Error::other(e)));
            RelayOutcome::from_copy(Direction::ClientToBackend, copied)
        }
        copied = &mut downstream => RelayOutcome::from_copy(Direction::BackendToClient, copied),
    };

    match (outcome.first_closed, outcome.error.is_some()) {
        (Direction::ClientToBackend, false) => {
            let _ = tokio::time::timeout(grace, &mut downstream).await;
        }
        (Direction::BackendToClient, false) => {
            if tokio::time::timeout(grace, &mut upstream).await.is_err() {
                upstream.abort();
                let _ = upstream.await;
            }
        }
        (Direction::BackendToClient, true) => {
            upstream.abort();
            let _ = upstream.await;
        }
        (Direction::ClientToBackend, true) => {}
    }

    outcome
}
