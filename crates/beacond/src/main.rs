//! beacond — the Beacon registry daemon.
//!
//! Single binary that assembles the registry:
//! - Registry store (redb)
//! - Heartbeat monitor (flag stale services, evict after one more tick)
//! - REST API (register / heartbeat / list)
//!
//! It also ships the client side as the `agent` subcommand.
//!
//! # Usage
//!
//! ```text
//! beacond serve --config /etc/beacon/beacon.toml
//! beacond agent --server 10.0.0.5:8080 --name billing --port 9000
//! ```

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use beacon_agent::{AgentConfig, HeartbeatAgent};
use beacon_health::{HeartbeatMonitor, IntervalTicker, MAX_PERIOD, parse_duration};
use beacon_state::RegistryStore;

use crate::config::BeaconConfig;

#[derive(Parser)]
#[command(name = "beacond", about = "Beacon service registry daemon", version)]
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
    /// Run the registry: REST API plus heartbeat monitor.
    Serve(ServeArgs),

    /// Register a service and keep it alive with heartbeats.
    Agent {
        /// Registry address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        server: String,

        /// Service name to register.
        #[arg(long)]
        name: String,

        /// Address other services should use to reach this one.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port other services should use to reach this one.
        #[arg(long)]
        port: u16,

        /// Time between heartbeats (e.g. "30s").
        #[arg(long, default_value = "30s")]
        interval: String,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Path to beacon.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.listen`.
    #[arg(long)]
    listen: Option<String>,

    /// Database file, overrides `storage.path`.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Keep the registry in memory only.
    #[arg(long)]
    in_memory: bool,

    /// Silence before a service is flagged unhealthy, overrides `monitor.liveness_threshold`.
    #[arg(long)]
    liveness_threshold: Option<String>,

    /// Time between monitor sweeps, overrides `monitor.tick_period`.
    #[arg(long)]
    tick_period: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Agent {
            server,
            name,
            host,
            port,
            interval,
        } => run_agent(server, name, host, port, interval).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,beacond=debug,beacon_state=debug,beacon_health=debug,beacon_api=debug,beacon_agent=debug")
    });
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => BeaconConfig::from_file(path)?,
        None => BeaconConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(data) = args.data {
        config.storage.path = data;
    }
    if let Some(threshold) = args.liveness_threshold {
        config.monitor.liveness_threshold = threshold;
    }
    if let Some(tick) = args.tick_period {
        config.monitor.tick_period = tick;
    }

    info!("Beacon registry starting");

    let monitor_config = config.monitor_config()?;
    let addr = config.listen_addr()?;

    // ── Registry store ─────────────────────────────────────────

    let store = if args.in_memory {
        let store = RegistryStore::open_in_memory()?;
        info!("in-memory registry store opened");
        store
    } else {
        let path = &config.storage.path;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
        }
        let store = RegistryStore::open(path)?;
        info!(path = ?path, "registry store opened");
        store
    };

    // ── Heartbeat monitor ──────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = HeartbeatMonitor::new(store.clone(), monitor_config)?;
    let monitor_handle = tokio::spawn(
        monitor.run(IntervalTicker::new(monitor_config.tick_period), shutdown_rx),
    );
    info!(
        detection_secs = monitor_config.worst_case_detection().as_secs(),
        eviction_secs = monitor_config.worst_case_eviction().as_secs(),
        "heartbeat monitor scheduled"
    );

    // ── API server ─────────────────────────────────────────────

    let router = beacon_api::build_router(store);
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_ctrl_c().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = monitor_handle.await;

    info!("Beacon registry stopped");
    Ok(())
}

async fn run_agent(
    server: String,
    name: String,
    host: String,
    port: u16,
    interval: String,
) -> anyhow::Result<()> {
    let mut config = AgentConfig::new(&server, &name, &host, port);
    config.interval =
        parse_duration(&interval).with_context(|| format!("invalid interval {interval:?}"))?;
    anyhow::ensure!(!config.interval.is_zero(), "interval must be non-zero");
    anyhow::ensure!(
        config.interval <= MAX_PERIOD,
        "interval must be at most {}s",
        MAX_PERIOD.as_secs()
    );

    let agent = HeartbeatAgent::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    agent.run(shutdown_rx).await;
    Ok(())
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
}
