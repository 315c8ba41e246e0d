use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use powerjob_worker::client::HttpServerApi;
use powerjob_worker::config::WorkerConfig;
use powerjob_worker::metrics::SysinfoSampler;
use powerjob_worker::processor::{ProcessorRegistry, SimpleProcessor};
use powerjob_worker::store::{LibSqlStore, MemoryStore, Storage};
use powerjob_worker::worker::{WorkerDeps, WorkerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing()?;

    let config = WorkerConfig::from_env().context("loading worker configuration")?;
    eprintln!("⚙️  PowerJob worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   App: {}", config.app_name);
    eprintln!("   Server: {}", config.bootstrap_server);
    eprintln!("   Listen: http://{}{}", config.listen_addr, config.route_base);

    // ── Storage ──────────────────────────────────────────────────────────
    let store: Arc<dyn Storage> = match &config.db_path {
        Some(path) => {
            eprintln!("   Database: {}", path.display());
            Arc::new(
                LibSqlStore::new_local(path)
                    .await
                    .with_context(|| format!("opening database at {}", path.display()))?,
            )
        }
        None => {
            eprintln!("   Database: in-memory");
            Arc::new(MemoryStore::new())
        }
    };

    // ── Processors ───────────────────────────────────────────────────────
    let registry = Arc::new(ProcessorRegistry::new());
    registry.register(Arc::new(SimpleProcessor)).await?;

    let deps = WorkerDeps {
        api: Arc::new(HttpServerApi::new(config.http_timeout)?),
        store,
        registry,
        sampler: Arc::new(SysinfoSampler::new()),
    };

    let root = CancellationToken::new();
    let runtime = WorkerRuntime::start(config, deps, root).await?;
    eprintln!("   Worker address: {}\n", runtime.worker_address());

    shutdown_signal().await;
    runtime.shutdown().await;
    Ok(())
}

/// Stdout logging, plus a daily-rolling file when `POWERJOB_LOG_DIR` is set.
fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false);

    let log_dir = std::env::var("POWERJOB_LOG_DIR")
        .ok()
        .filter(|d| !d.is_empty());
    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {log_dir}"))?;
    let appender = tracing_appender::rolling::daily(&log_dir, "powerjob-worker.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    info!(dir = %log_dir, "Logging to file");
    Ok(Some(guard))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
