//! Raw TLS tunnel mode.
//!
//! # Data Flow
//! ```text
//! raw TCP stream
//!     → handler.rs authorize (identity lookup, 2s, fail-closed)
//!     → net::tls (handshake only for authorized peers)
//!     → net::backend (fresh dial, TCP or Unix socket)
//!     → relay.rs (bytes both ways, half-close aware)
//! ```

pub mod handler;
pub mod relay;

pub use handler::{TunnelHandler, TunnelOutcome};
pub use relay::{relay, relay_with_grace, Direction, RelayOutcome, HALF_CLOSE_GRACE};
