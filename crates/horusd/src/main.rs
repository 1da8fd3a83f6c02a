//! horusd — the Horus leaf daemon.
//!
//! Loads a `leaf.toml`, provisions every cluster in it and serves packets
//! over UDP, with an optional HTTP admin endpoint.
//!
//! # Usage
//!
//! ```text
//! horusd scaffold --leaf-id 100 > leaf.toml
//! horusd check --config leaf.toml
//! horusd run --config leaf.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use horus_core::LeafConfig;
use horus_leaf::Leaf;
use horusd::PacketLoop;

const DEFAULT_FILTER: &str = "info,horusd=debug,horus=debug";

#[derive(Parser)]
#[command(name = "horusd", about = "Horus leaf scheduler daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the leaf.
    Run {
        /// Path to leaf.toml.
        #[arg(long, default_value = "leaf.toml")]
        config: PathBuf,
    },

    /// Parse and provision a config, then print the resulting cluster state.
    Check {
        #[arg(long, default_value = "leaf.toml")]
        config: PathBuf,
    },

    /// Print an example config.
    Scaffold {
        #[arg(long, default_value = "100")]
        leaf_id: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Check { config } => check(&config),
        Command::Scaffold { leaf_id } => {
            print!("{}", LeafConfig::scaffold(leaf_id).to_toml_string()?);
            Ok(())
        }
    }
}

fn load(path: &Path) -> anyhow::Result<(LeafConfig, Leaf)> {
    let config = LeafConfig::from_file(path)?;
    let leaf = Leaf::from_config(&config)?;
    info!(path = %path.display(), clusters = config.clusters.len(), "config loaded");
    Ok((config, leaf))
}

fn check(path: &Path) -> anyhow::Result<()> {
    let (_, leaf) = load(path)?;
    println!("{}", serde_json::to_string_pretty(&leaf.snapshots())?);
    Ok(())
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let (config, leaf) = load(path)?;
    let leaf = Arc::new(leaf);
    info!(leaf_id = config.leaf.id, "Horus leaf starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Packet loop ────────────────────────────────────────────

    let packets = PacketLoop::bind(
        config.leaf.listen,
        leaf.clone(),
        Duration::from_millis(config.leaf.sweep_interval_ms),
    )
    .await?;
    info!(addr = %packets.local_addr()?, "listening for packets");
    let packet_handle = tokio::spawn(packets.run(shutdown_rx.clone()));

    // ── Admin API ──────────────────────────────────────────────

    let ctrl_c = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    };

    match config.leaf.admin {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "admin API starting");
            axum::serve(listener, horusd::build_router(leaf))
                .with_graceful_shutdown(ctrl_c)
                .await?;
        }
        None => ctrl_c.await,
    }

    let _ = packet_handle.await;
    info!("Horus leaf stopped");
    Ok(())
}
