//! cluster-sync node.
//!
//! Runs either side of the configuration sync protocol.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────── control plane ────────────────────┐
//!   │ declarative doc ─▶ broadcaster ─▶ session queues      │
//!   │                         ▲              │              │
//!   │  watcher ─▶ change feed ┘              ▼              │
//!   │          listener ─▶ TLS ─▶ auth gate ─▶ hub sessions │
//!   └────────────────────────────────────────┬──────────────┘
//!                                            │ wss /v1/outlet
//!   ┌──────────────────── data plane ────────┴──────────────┐
//!   │ agent: receive ─▶ pending slot ─▶ apply ─▶ loader     │
//!   │        heartbeat (config hash)          └─▶ cache     │
//!   └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use cluster_sync::config::{load_config, Role, SyncConfig};
use cluster_sync::lifecycle::{self, Shutdown};
use cluster_sync::observability::logging::init_logging;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    ControlPlane,
    DataPlane,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::ControlPlane => Role::ControlPlane,
            RoleArg::DataPlane => Role::DataPlane,
        }
    }
}

#[derive(Parser)]
#[command(name = "cluster-sync")]
#[command(about = "Configuration sync between gateway control and data planes", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured role.
    #[arg(short, long, value_enum)]
    role: Option<RoleArg>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SyncConfig::default(),
    };
    if let Some(role) = cli.role {
        config.role = role.into();
    }

    init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = config.role.as_str(),
        config = ?cli.config,
        "cluster-sync starting"
    );

    let shutdown = Shutdown::new();
    lifecycle::spawn_signal_handler(shutdown.clone());

    if let Err(e) = lifecycle::run(config, shutdown).await {
        tracing::error!(error = %e, "Startup failed");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
