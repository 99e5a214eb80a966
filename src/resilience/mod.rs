//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call leaving the process (whois, dial, handshake):
//!     → timeouts.rs (enforce deadline)
//!     → On expiry: caller decides (drop connection / forward unauthenticated)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries: a failed identity lookup or dial fails that connection only,
//!   so outages of the identity service stay visible in the logs

pub mod timeouts;

pub use timeouts::{with_deadline, Elapsed};
