//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every call that leaves the process (identity
//!   lookup, backend dial, TLS handshake, local API round-trips)
//! - Report which operation ran out of time
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Expiry is an ordinary error value; callers apply their own policy

use std::future::Future;
use std::time::Duration;

/// An operation did not complete before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} timed out after {after:?}")]
pub struct Elapsed {
    /// Short name of the operation, used in logs.
    pub operation: &'static str,
    /// The deadline that was exceeded.
    pub after: Duration,
}

/// Run `fut` to completion or give up after `after`.
///
/// The future is dropped on expiry, which cancels any I/O it had in flight.
pub async fn with_deadline<F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Elapsed { operation, after })
}
