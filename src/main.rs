//! Ingress reconciler
//!
//! Keeps a reverse-proxy worker process in line with a declarative routing
//! intent.
//!
//! # Architecture Overview
//!
//! ```text
//!   intent file ──▶ FileWatcher ──▶ InMemoryStore
//!                        │
//!                        ▼ Event
//!   ┌───────────────────────────────────────────────────────────────┐
//!   │                        CONTROLLER                             │
//!   │                                                               │
//!   │  event channel ─▶ RateLimitedQueue ─▶ sync_intent             │
//!   │                                          │                    │
//!   │                              ConfigRenderer ─▶ Applier        │
//!   │                                                  │ test/reload│
//!   │  ProcessSupervisor ◀──── worker exits            ▼            │
//!   │        │ spawn / quit                      worker process     │
//!   │        ▼                                                      │
//!   │  PassthroughProxy (SNI) ─────▶ passthrough backends           │
//!   │        └─────────────────────▶ worker ssl-proxy port          │
//!   │                                                               │
//!   │  /healthz /status (axum)        metrics (Prometheus)          │
//!   └───────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ingress_reconciler::config::{load_config, FileWatcher};
use ingress_reconciler::lifecycle::wait_for_shutdown_signal;
use ingress_reconciler::observability::{init_tracing, metrics};
use ingress_reconciler::{Controller, InMemoryStore, Store};

#[derive(Debug, Parser)]
#[command(name = "ingress-reconciler", version, about)]
struct Cli {
    /// Controller configuration file.
    #[arg(short, long, default_value = "/etc/ingress-reconciler/controller.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.check {
        println!("{}: configuration ok", cli.config.display());
        return Ok(());
    }

    init_tracing(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "ingress-reconciler starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &config.controller.intent_file {
        store.load_intent_file(path)?;
    }

    let controller = Controller::new(config.clone(), Arc::clone(&store) as Arc<dyn Store>);

    // Kept alive for the lifetime of the process.
    let _watcher = FileWatcher::new(
        config.controller.intent_file.clone(),
        config.controller.watch_files.clone(),
        Arc::clone(&store),
        controller.events(),
    )
    .run()?;

    let stopper = Arc::clone(&controller);
    let stopping = tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return;
        }
        if let Err(e) = stopper.stop().await {
            tracing::error!(error = %e, "Error while stopping controller");
        }
    });

    Arc::clone(&controller).start().await?;

    // The loop ends as soon as stop begins; the worker may still be running.
    stopping.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
