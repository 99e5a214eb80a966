//! tsproxy
//!
//! Proxies TLS connections arriving over the overlay network to a local TCP
//! or Unix socket, authenticating every peer with the overlay daemon first.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                     TSPROXY                      │
//!                      │                                                  │
//!   Overlay peer       │  ┌──────────┐   ┌─────────┐   ┌───────────────┐  │
//!   ───────────────────┼─▶│ listener │──▶│   tls   │──▶│ tunnel | http │──┼──▶ Backend
//!                      │  └──────────┘   └────┬────┘   └───────┬───────┘  │    (TCP / Unix)
//!                      │                      │ cert           │ whois    │
//!                      │                      ▼                ▼          │
//!                      │               ┌──────────────────────────────┐   │
//!                      │               │   overlay daemon local API   │   │
//!                      │               └──────────────────────────────┘   │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use tsproxy::config::{resolve_config, Overrides};
use tsproxy::lifecycle::{trigger_on_signal, Proxy, Shutdown};
use tsproxy::observability::init_logging;
use tsproxy::ProxyMode;

#[derive(Parser)]
#[command(name = "tsproxy")]
#[command(version, about = "Proxy TLS connections from the overlay network to a local TCP or Unix socket", long_about = None)]
struct Cli {
    /// (Local) address to proxy connections to: host:port or an absolute socket path
    #[arg(long)]
    to: Option<String>,

    /// Overlay node name to use [default: aproxy]
    #[arg(long)]
    from: Option<String>,

    /// Raw TLS tunnel or HTTP reverse proxy [default: tunnel]
    #[arg(long, value_enum)]
    mode: Option<ProxyMode>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-authorized key used when the node needs to log in
    #[arg(long, env = "TS_AUTHKEY", hide_env_values = true)]
    auth_key: Option<String>,

    /// Directory for node state [default: <config dir>/tsproxy-<node>]
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "tsproxy=debug"
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            mode: self.mode,
            backend: self.to.clone(),
            node_name: self.from.clone(),
            auth_key: self.auth_key.clone(),
            state_dir: self.state_dir.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error}\n");
            let _ = Cli::command().print_help();
            return ExitCode::from(2);
        }
    };

    if let Err(error) = init_logging(&config.observability) {
        eprintln!("error: {error}");
        return ExitCode::from(2);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        node_name = %config.node_name,
        backend = %config.backend,
        "tsproxy starting"
    );

    let proxy = match Proxy::bootstrap(&config).await {
        Ok(proxy) => proxy,
        Err(error) => {
            tracing::error!(%error, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    tokio::spawn(trigger_on_signal(shutdown.clone()));
    proxy.run(shutdown).await;

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
