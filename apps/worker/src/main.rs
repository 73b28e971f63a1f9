//! # tillsync Worker
//!
//! Scheduled sync of POS transactions into the local SQLite cache.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          tillsync-worker                                │
//! │                                                                         │
//! │  WorkerConfig ──► Database ──► PosApiClient ──► SyncOrchestrator        │
//! │                                                       │                 │
//! │                         --once: one pass, exit code   │                 │
//! │                         default: SyncScheduler until SIGTERM / Ctrl-C   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tillsync_core::WindowMode;
use tillsync_db::Database;
use tillsync_sync::{
    PassDeps, PosApiClient, SyncOrchestrator, SyncScheduler, TracingSink, UpstreamFetcher,
    WorkerConfig,
};

/// Keeps a local cache of POS transactions in sync with the vendor API.
#[derive(Debug, Parser)]
#[command(name = "tillsync-worker", version, about)]
struct Cli {
    /// Path to worker.toml (defaults to the platform config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single pass and exit.
    #[arg(long)]
    once: bool,

    /// With --once, fetch the whole history instead of the recent window.
    #[arg(long, requires = "once")]
    full: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("Worker failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    info!("Starting tillsync worker...");

    let config = WorkerConfig::load(cli.config).context("loading configuration")?;
    info!(
        base_url = %config.api.base_url,
        database = %config.database.path.display(),
        interval_secs = config.sync.interval_secs,
        "Configuration loaded"
    );

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let db = Database::new(config.db_config())
        .await
        .context("opening the cache database")?;

    let client = PosApiClient::new(&config.api).context("building the API client")?;
    let deps = PassDeps {
        db: db.clone(),
        fetcher: UpstreamFetcher::new(Arc::new(client), config.fetch_settings()),
        telemetry: Arc::new(TracingSink),
        policy: config.deletion_policy()?,
        settings: config.pass_settings(),
    };
    let orchestrator = SyncOrchestrator::new(deps);

    let code = if cli.once {
        let mode = if cli.full {
            WindowMode::Full
        } else {
            WindowMode::Incremental
        };
        let pass_timeout = config.scheduler_settings().pass_timeout;
        match orchestrator.run_bounded(mode, pass_timeout).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        }
    } else {
        let handle = SyncScheduler::spawn(orchestrator, config.scheduler_settings());
        shutdown_signal().await;

        let status = handle.status().await;
        info!(passes = status.passes, "Stopping scheduler");
        handle.shutdown().await;
        ExitCode::SUCCESS
    };

    db.close().await;
    info!("Worker shutdown complete");
    Ok(code)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tillsync=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
