//! Configuration loading from disk and command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::{ProxyConfig, ProxyMode};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<ProxyMode>,
    pub backend: Option<String>,
    pub node_name: Option<String>,
    pub auth_key: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Overrides {
    /// Apply every set value onto `config`.
    pub fn apply(self, config: &mut ProxyConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(node_name) = self.node_name {
            config.node_name = node_name;
        }
        if let Some(auth_key) = self.auth_key {
            config.overlay.auth_key = Some(auth_key);
        }
        if let Some(state_dir) = self.state_dir {
            config.overlay.state_dir = Some(state_dir);
        }
        if let Some(log_level) = self.log_level {
            config.observability.log_level = log_level;
        }
    }
}

/// Parse a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build the effective configuration: file (if any), then overrides, then validation.
pub fn resolve_config(path: Option<&Path>, overrides: Overrides) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
