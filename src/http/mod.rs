//! HTTP reverse-proxy mode.
//!
//! # Data Flow
//! ```text
//! TLS stream (ALPN h2 / http/1.1)
//!     → server.rs (Axum, request ID, tracing)
//!     → director.rs / request.rs (rewrite target, strip spoofed headers)
//!     → identity lookup (5s, fail-open)
//!     → director.rs (inject identity headers)
//!     → forward.rs (fresh HTTP/1.1 connection to the backend)
//! ```

pub mod director;
pub mod forward;
pub mod request;
pub mod server;

pub use director::{tailnet_name, Director, HeaderNames};
pub use forward::{forward, ForwardError};
pub use request::rewrite_target;
pub use server::{AppState, HttpServer};
