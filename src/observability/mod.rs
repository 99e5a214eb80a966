//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!       (connection_id, remote_addr, login_name, request_id, ...)
//!     → logging.rs (filter + pretty/JSON formatting to stdout)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows from the router to the backend and back

pub mod logging;

pub use logging::{init_logging, LoggingError};
