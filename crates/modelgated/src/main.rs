//! modelgated — the modelgate daemon.
//!
//! Single binary that assembles the modelgate subsystems:
//! - State store (redb): tier state and session assignments
//! - Session router + tier backends
//! - Load signal (log volume or request rate)
//! - Capacity controller (scale-up / scale-down loops)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! modelgated standalone --port 8000 --data-dir /var/lib/modelgate
//! modelgated status --data-dir /var/lib/modelgate
//! ```
//!
//! `api` and `capacity` run one half each. The bundled redb store is
//! single-process, so splitting them across processes needs a shared
//! `KvStore` implementation.

mod gate;
mod telemetry;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use modelgate_core::GateConfig;

use crate::gate::Gate;

#[derive(Parser)]
#[command(
    name = "modelgated",
    about = "modelgate daemon — tiered model routing",
    version
)]
struct Cli {
    /// Configuration file. Missing file means defaults.
    #[arg(long, global = true, default_value = "modelgate.toml")]
    config: PathBuf,

    /// Data directory for persistent state.
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API and the capacity controller in one process.
    Standalone {
        /// Port to listen on (overrides [server].port).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run only the API.
    Api {
        /// Port to listen on (overrides [server].port).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run only the capacity controller.
    Capacity,
    /// Print tier state and session counts, then exit.
    Status,
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = GateConfig::load_or_default(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;

    match cli.command {
        Command::Standalone { port } => {
            apply_port(&mut config, port);
            let log = telemetry::init(&config.logging)?;
            info!(log = ?log, "modelgate daemon starting in standalone mode");
            run_standalone(Gate::open(config, &cli.data_dir)?).await
        }
        Command::Api { port } => {
            apply_port(&mut config, port);
            let log = telemetry::init(&config.logging)?;
            info!(log = ?log, "modelgate daemon starting in api mode");
            run_api(Gate::open(config, &cli.data_dir)?).await
        }
        Command::Capacity => {
            let log = telemetry::init(&config.logging)?;
            info!(log = ?log, "modelgate daemon starting in capacity mode");
            run_capacity(Gate::open(config, &cli.data_dir)?).await
        }
        Command::Status => {
            telemetry::init_console()?;
            print_status(config, &cli.data_dir)
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn apply_port(config: &mut GateConfig, port: Option<u16>) {
    if let Some(port) = port {
        config.server.port = port;
    }
}

async fn run_standalone(gate: Gate) -> anyhow::Result<()> {
    let (signal, requests) = gate.signal();
    let controller = gate.controller(signal);
    info!("capacity controller initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let capacity_handle = tokio::spawn({
        let controller = controller.clone();
        async move { controller.run(shutdown_rx).await }
    });

    // ── Start API server ───────────────────────────────────────

    let router = modelgate_api::build_router(gate.api_state(Some(controller), requests));
    serve(&gate, router, shutdown_tx).await?;

    let _ = capacity_handle.await;
    info!("modelgate daemon stopped");
    Ok(())
}

async fn run_api(gate: Gate) -> anyhow::Result<()> {
    let (shutdown_tx, _) = watch::channel(false);
    let router = modelgate_api::build_router(gate.api_state(None, None));
    serve(&gate, router, shutdown_tx).await?;
    info!("modelgate daemon stopped");
    Ok(())
}

async fn run_capacity(gate: Gate) -> anyhow::Result<()> {
    let (signal, requests) = gate.signal();
    if requests.is_some() {
        info!("request-rate signal has no API to feed it in capacity mode; load reads as zero");
    }
    let controller = gate.controller(signal);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let capacity_handle = tokio::spawn({
        let controller = controller.clone();
        async move { controller.run(shutdown_rx).await }
    });

    wait_for_ctrl_c().await;
    let _ = shutdown_tx.send(true);
    let _ = capacity_handle.await;
    info!("modelgate daemon stopped");
    Ok(())
}

async fn serve(
    gate: &Gate,
    router: axum::Router,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let host: std::net::IpAddr = gate
        .config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server host {:?}", gate.config.server.host))?;
    let addr = SocketAddr::from((host, gate.config.server.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_ctrl_c().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
    }
}

fn print_status(config: GateConfig, data_dir: &Path) -> anyhow::Result<()> {
    let gate = Gate::open(config, data_dir)
        .context("store unavailable (a running daemon holds the redb lock; query GET /capacity instead)")?;
    let report = gate.report()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
