//! Filestore -- file lifecycle service over an external object store.
//!
//! Startup wires configuration, the metadata store, the backend provider,
//! and (when enabled) the event reconciliation pipeline, then serves the
//! HTTP API. SIGTERM/SIGINT stop accepting connections, let in-flight
//! work finish, and stop the pipeline only between notification batches.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use filestore::controller::LifecycleController;
use filestore::events::{new_event_listener, run_pipeline, Reconciler};
use filestore::metadata::store::MetadataStore;
use filestore::storage::EnvBackendProvider;

/// Command-line arguments for the Filestore server.
#[derive(Parser, Debug)]
#[command(
    name = "filestore",
    version,
    about = "File lifecycle service issuing presigned object-store capabilities"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "filestore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = filestore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    if config.observability.metrics {
        filestore::metrics::init_metrics();
        filestore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Metadata store.
    let metadata: Arc<dyn MetadataStore> = match config.metadata.engine.as_str() {
        "memory" => {
            info!("In-memory metadata store initialized");
            Arc::new(filestore::metadata::memory::MemoryMetadataStore::new(
                config.store.namespace_modulus,
            ))
        }
        _ => {
            let path = &config.metadata.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = filestore::metadata::sqlite::SqliteMetadataStore::new(
                path,
                config.store.namespace_modulus,
            )?;
            info!("SQLite metadata store initialized at {}", path);
            Arc::new(store)
        }
    };

    // Backend kind is resolved once; request-time dispatch is over the
    // closed variant set.
    let provider = Arc::new(EnvBackendProvider::new(&config.store.kind)?);
    info!(
        "Store kind '{}' resolved to {:?}",
        provider.label(),
        provider.kind()
    );

    let controller = Arc::new(LifecycleController::new(
        metadata.clone(),
        provider.clone(),
        &config.store,
    ));

    // Shutdown is a watch flag: flipped once by the signal handler,
    // observed by the HTTP server and the pipeline tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
    }

    // Reconciliation pipeline: listener task feeding a bounded channel,
    // one worker applying conditional updates.
    let listener_enabled = config.listener.enabled || config.listener.only_mode;
    let mut pipeline_tasks = Vec::new();
    if listener_enabled {
        let listener = new_event_listener(provider.kind(), provider.label())?;
        let (tx, rx) = mpsc::channel(config.listener.queue_depth.max(1));
        let reconciler = Reconciler::new(metadata.clone(), provider.label());

        let listener_shutdown = shutdown_rx.clone();
        pipeline_tasks.push(tokio::spawn(async move {
            if let Err(e) = listener.run(tx, listener_shutdown).await {
                error!(error = %e, "event listener terminated");
            }
        }));

        let worker_shutdown = shutdown_rx.clone();
        pipeline_tasks.push(tokio::spawn(async move {
            if let Err(e) = run_pipeline(reconciler, rx, worker_shutdown).await {
                error!(error = %e, "reconciliation pipeline terminated");
            }
        }));
        info!("Reconciliation pipeline started");
    }

    if config.listener.only_mode {
        info!("Listener-only mode: HTTP API disabled");
        wait_for_shutdown(shutdown_rx.clone()).await;
    } else {
        let bind_addr = cli
            .bind
            .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

        let state = Arc::new(filestore::AppState {
            config: config.clone(),
            controller,
        });
        let app = filestore::server::app(state);

        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!("Filestore listening on {}", bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
            .await?;
    }

    // Stop the pipeline; batches in flight are finished, not interrupted.
    let _ = shutdown_tx.send(true);
    let deadline = Duration::from_secs(config.server.shutdown_timeout);
    for task in pipeline_tasks {
        if tokio::time::timeout(deadline, task).await.is_err() {
            warn!("pipeline task did not stop within the shutdown timeout");
        }
    }

    info!("Filestore shut down");
    Ok(())
}

/// Initialize tracing with the configured level and format. `RUST_LOG`
/// still wins when set.
fn init_tracing(logging: &filestore::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));
    if logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolve once the shutdown flag flips.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
