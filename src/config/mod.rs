//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (--to, --from, --mode, ...)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to the tunnel handler / HTTP director
//! ```
//!
//! # Design Decisions
//! - Config is resolved once before the first connection is accepted
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, resolve_config, ConfigError, Overrides};
pub use schema::{
    HeaderConfig, IdentityConfig, ListenerConfig, LogFormat, ObservabilityConfig, OverlayConfig,
    ProxyConfig, ProxyMode, TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
