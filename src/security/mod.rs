//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (HTTP mode):
//!     → headers.rs (strip hop-by-hop and spoofed identity headers,
//!                   add X-Forwarded-*)
//!     → identity headers injected by http::director
//! ```
//!
//! # Design Decisions
//! - No trust in client input: identity headers reaching the backend were
//!   written by the proxy

pub mod headers;

pub use headers::{add_forwarded_headers, strip_headers, strip_hop_by_hop};
