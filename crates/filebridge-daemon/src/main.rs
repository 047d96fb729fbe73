//! FileBridge Daemon - Background transfer service
//!
//! This binary runs as a system service and handles:
//! - Scheduled transfers for every endpoint of this worker instance
//! - Hotfolder uploads for endpoints flagged `HotfolderPut`
//! - Logging of transfer events
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon opens the store, registers the worker instance, starts the
//! [`Dispatcher`] and one [`HotfolderWatcher`] per hotfolder endpoint, then
//! waits on a `CancellationToken` triggered by SIGTERM or SIGINT.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use filebridge_core::config::Config;
use filebridge_core::domain::{Direction, Endpoint, InstanceId};
use filebridge_core::ports::{
    ChannelSink, ITransferRepository, ITransportFactory, Notifier, SyncEvent,
};
use filebridge_store::{DatabasePool, SqliteTransferRepository};
use filebridge_sync::{Dispatcher, HotfolderWatcher, SyncContext};
use filebridge_transport::ProtocolTransportFactory;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configuration file location
const CONFIG_ENV: &str = "FILEBRIDGE_CONFIG";

/// How long shutdown waits for queued transfer events to be logged
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the store and the transfer components of one worker instance
struct DaemonService {
    config: Config,
    repo: Arc<SqliteTransferRepository>,
    /// Keeps the pool alive for the lifetime of the daemon
    _db_pool: DatabasePool,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database named in `config`
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_pool = DatabasePool::new(&config.database.path)
            .await
            .context("Failed to open database")?;
        let repo = Arc::new(SqliteTransferRepository::new(db_pool.pool().clone()));

        Ok(Self {
            config,
            repo,
            _db_pool: db_pool,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    async fn run(&self) -> Result<()> {
        let hostname = self.config.instance_name();
        let instance_id = self
            .repo
            .init_instance(&hostname)
            .await
            .context("Failed to register worker instance")?;
        info!(%hostname, instance = %instance_id, "Worker instance registered");

        let (sink, events) = ChannelSink::new();
        let event_task = spawn_event_logger(events);

        let ctx = SyncContext::new(
            instance_id,
            self.config.sync.clone(),
            Notifier::new(Arc::new(sink)),
        );
        let repo: Arc<dyn ITransferRepository> = self.repo.clone();
        let factory: Arc<dyn ITransportFactory> = Arc::new(ProtocolTransportFactory::default());

        let dispatcher = Dispatcher::new(
            Arc::clone(&repo),
            Arc::clone(&factory),
            ctx.clone(),
            self.config.dispatcher.clone(),
        );
        dispatcher.start();

        let mut watchers = self
            .start_hotfolders(instance_id, &repo, &factory, &ctx, dispatcher.transfer_counter())
            .await;

        self.shutdown.cancelled().await;
        info!("Shutting down transfer components");

        for watcher in &mut watchers {
            watcher.shutdown().await;
        }
        dispatcher.shutdown().await;
        let files = dispatcher.files_transferred();

        // The logger ends once the last notifier clone is dropped
        drop(watchers);
        drop(dispatcher);
        drop(ctx);
        match tokio::time::timeout(EVENT_DRAIN_TIMEOUT, event_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Event logger ended abnormally"),
            Err(_) => warn!("Event logger still busy at shutdown, abandoning it"),
        }

        info!(files, "Transfer components stopped");
        Ok(())
    }

    /// Starts one watcher per hotfolder endpoint; failures are logged
    async fn start_hotfolders(
        &self,
        instance_id: InstanceId,
        repo: &Arc<dyn ITransferRepository>,
        factory: &Arc<dyn ITransportFactory>,
        ctx: &SyncContext,
        counter: Arc<AtomicU64>,
    ) -> Vec<HotfolderWatcher> {
        let endpoints = match repo.get_endpoints(instance_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!(error = %e, "Cannot load endpoints, hotfolders disabled");
                return Vec::new();
            }
        };

        let mut watchers = Vec::new();
        for endpoint in hotfolder_endpoints(endpoints) {
            let id = endpoint.id;
            let mut watcher =
                HotfolderWatcher::new(endpoint, Arc::clone(repo), Arc::clone(factory), ctx.clone())
                    .with_counter(Arc::clone(&counter));
            match watcher.start_watching() {
                Ok(()) => watchers.push(watcher),
                Err(e) => error!(endpoint = %id, error = %e, "Cannot watch hotfolder"),
            }
        }
        info!(count = watchers.len(), "Hotfolder watchers started");
        watchers
    }
}

/// Endpoints flagged for hotfolder uploads
fn hotfolder_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    endpoints
        .into_iter()
        .filter(|e| e.direction.contains(Direction::HOTFOLDER_PUT))
        .collect()
}

/// Status events are already mirrored to `tracing` by the notifier; only
/// per-file events are logged here
fn spawn_event_logger(mut events: UnboundedReceiver<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let SyncEvent::FileTransferred { direction, file } = event {
                info!(
                    %direction,
                    file = %file.name,
                    size = file.size,
                    checksum = %file.checksum,
                    "File transferred"
                );
            }
        }
    })
}

// ============================================================================
// Configuration and logging
// ============================================================================

/// `$FILEBRIDGE_CONFIG` or the platform default
fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// Loads the file if present, defaults otherwise; rejects invalid settings
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        Config::default()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration: {}", details.join("; "));
    }
    Ok(config)
}

/// `RUST_LOG` wins over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = load_config(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.logging.level))
        .with_target(true)
        .init();

    info!(config_path = %path.display(), "FileBridge daemon starting (filebridged)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("FileBridge daemon shut down gracefully"),
        Err(e) => error!(error = %e, "FileBridge daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
