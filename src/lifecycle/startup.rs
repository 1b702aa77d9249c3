//! Startup orchestration.
//!
//! # Responsibilities
//! - Calibrate the date codec against the temp directory
//! - Build the dispatcher, the configured contexts and the orchestrator
//! - Start the metrics exporter when enabled
//! - Sweep idle sessions on an interval until shutdown
//! - Bind the listener last and serve until a stop signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::dispatch::{status_handler, DispatchError, Dispatcher};
use crate::files::FileStore;
use crate::http::{DateCodec, HttpServer, Orchestrator};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::{metrics, ServerStats};
use crate::routing::{RouteError, RouteRegistry};
use crate::security::{RequestLimits, SessionLookup};
use crate::vfs::FsError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("file store {prefix}: {source}")]
    FileStore {
        prefix: String,
        #[source]
        source: FsError,
    },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("metrics address {0:?} is not a socket address")]
    MetricsAddress(String),

    #[error("could not start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Register the configured file stores and the status page on `registry`.
pub fn build_registry(
    config: &ServerConfig,
    mut registry: RouteRegistry,
    dispatcher: &Dispatcher,
    stats: &Arc<ServerStats>,
) -> Result<RouteRegistry, StartupError> {
    for store_config in &config.file_stores {
        let mut store = FileStore::new().with_index_files(config.server.index_files.clone());
        for root in &store_config.roots {
            let root = qualify(&config.paths.root_dir, root);
            store.add_root(&root).map_err(|source| StartupError::FileStore {
                prefix: store_config.prefix.clone(),
                source,
            })?;
        }
        registry.add_file_store(&store_config.prefix, store);
    }

    if let Some(path) = &config.server.status_path {
        registry
            .add_context(path, config.paths.root_dir.clone())
            .set_catch_all(status_handler(dispatcher.clone(), Arc::clone(stats)))?;
    }

    Ok(registry)
}

fn qualify(base: &std::path::Path, root: &std::path::Path) -> PathBuf {
    if root.is_absolute() {
        root.to_path_buf()
    } else {
        base.join(root)
    }
}

/// Every `every`, drop sessions idle for longer than `max_idle`. Stops when
/// `shutdown` fires.
pub fn spawn_session_sweep(
    sessions: Arc<dyn SessionLookup>,
    max_idle: Duration,
    every: Duration,
    shutdown: &Shutdown,
) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    let dropped = sessions.expire_idle(max_idle);
                    if dropped > 0 {
                        tracing::debug!(dropped, "Idle sessions expired");
                    }
                }
            }
        }
    })
}

fn sweep_interval(max_idle: Duration) -> Duration {
    max_idle.clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Serve the contexts from `config` until a stop signal.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    serve(config, RouteRegistry::new()).await
}

/// Serve `registry` plus the configured contexts until a stop signal.
pub async fn serve(config: ServerConfig, registry: RouteRegistry) -> Result<(), StartupError> {
    let dates = Arc::new(DateCodec::new());
    match dates.calibrate(&config.paths.temp_dir) {
        Ok(offset) => tracing::debug!(offset, "Date codec calibrated"),
        Err(e) => tracing::warn!(dir = %config.paths.temp_dir.display(), error = %e, "Date calibration failed"),
    }

    let dispatcher = Dispatcher::from_threads(config.server.threads)?;
    let stats = Arc::new(ServerStats::new());
    let registry = build_registry(&config, registry, &dispatcher, &stats)?;
    tracing::info!(
        contexts = registry.contexts().len(),
        threaded = dispatcher.is_threaded(),
        "Request pipeline ready"
    );

    let orchestrator = Orchestrator::builder(registry)
        .configure(&config)
        .dispatcher(dispatcher.clone())
        .dates(dates)
        .stats(stats)
        .build();

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(orchestrator, RequestLimits::from_config(&config));
    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());
    let max_idle = Duration::from_secs(config.security.session_idle_secs);
    let sweep = spawn_session_sweep(
        Arc::clone(server.orchestrator().sessions()),
        max_idle,
        sweep_interval(max_idle),
        &shutdown,
    );
    let result = server.run(listener, shutdown.clone()).await;
    shutdown.trigger();
    signals.abort();
    let _ = sweep.await;

    dispatcher.shutdown();
    tracing::info!("Shutdown complete");
    result.map_err(StartupError::from)
}
