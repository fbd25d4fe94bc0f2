//! Admission gate (v1)
//!
//! Sits in front of an HTTP upstream and limits how many requests reach it
//! at once.
//!
//! ```text
//!   client ──▶ listener ──▶ admission gate ──▶ upstream timeout ──▶ proxy ──▶ upstream
//!                               │
//!                               ├─ queue full / queue deadline ──▶ overload response
//!                               └─ client gone while queued ─────▶ (nothing)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use admission_gate::admin::{self, AdminState};
use admission_gate::config::{load_config, watcher::ConfigWatcher, GateConfig};
use admission_gate::lifecycle::{signals, Shutdown};
use admission_gate::observability::{logging, metrics};
use admission_gate::HttpServer;

#[derive(Parser)]
#[command(name = "admission-gate")]
#[command(about = "Concurrency-limiting gate in front of an HTTP upstream", long_about = None)]
struct Cli {
    /// Path to the TOML config file. Defaults are used when omitted.
    #[arg(short, long, env = "ADMISSION_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Watch the config file and apply reloadable settings on change.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!("admission-gate v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?);
    }

    let (config_tx, config_updates) = mpsc::unbounded_channel();
    // Keeps the file watch alive for the lifetime of main.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            tokio::spawn(async move {
                while let Some(update) = updates.recv().await {
                    if config_tx.send(update).is_err() {
                        break;
                    }
                }
            });
            Some(handle)
        }
        _ => None,
    };

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config.clone())?;

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            controller: server.controller().clone(),
            api_key: config.admin.api_key.as_str().into(),
        };
        Some(tokio::spawn(admin::run(listener, state, shutdown.subscribe())))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    server
        .run(listener, config_updates, shutdown.subscribe())
        .await?;

    if let Some(task) = admin_task {
        if let Err(e) = task.await? {
            tracing::error!(error = %e, "Admin API failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
