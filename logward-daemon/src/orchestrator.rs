//! Component orchestration -- assembly, wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `logward-daemon`.
//! It loads configuration, builds every component against a shared
//! connection pool, manages startup/shutdown ordering, and runs the
//! main event loop.
//!
//! # Startup Order
//!
//! 1. Schemas (log records, activations, incidents, jobs)
//! 2. Queue supervisor + detection-scan worker
//! 3. Notification listener (LISTEN on the log channel)
//! 4. Post-commit runner (publish + enqueue for accepted batches)
//!
//! # Shutdown Order (reverse of data flow)
//!
//! 1. Post-commit runner (stop producing notifications/jobs)
//! 2. Queue supervisor (workers first, then queues, then connections)
//! 3. Notification listener (UNLISTEN, drop subscribers)
//! 4. Connection pool

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use logward_core::config::LogwardConfig;
use logward_core::job::{Queue, SCAN_QUEUE};
use logward_detect::{
    ActivationSource, ActivationStore, IncidentCorrelator, IncidentStore, PackCatalog,
    PackService, RuleEvaluator,
};
use logward_ingest::{IngestWriter, LogStore, NotifyPublisher, PostCommitRunner};
use logward_queue::QueueSupervisor;
use logward_stream::{ListenerEvent, NotifyListener, SubscriberRegistry};

use crate::health::{DaemonHealth, aggregate_status};
use crate::metrics_server;
use crate::worker;

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: LogwardConfig,
    pool: PgPool,
    supervisor: Arc<QueueSupervisor>,
    listener: Arc<NotifyListener>,
    writer: Arc<IngestWriter>,
    pack_service: Arc<PackService>,
    log_store: Arc<LogStore>,
    evaluator: Arc<RuleEvaluator>,
    correlator: Arc<IncidentCorrelator>,
    post_commit: Option<PostCommitRunner>,
    cancel: CancellationToken,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogwardConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// Constructs every component and wires them together; no network
    /// traffic happens until [`Orchestrator::run`].
    pub async fn build_from_config(config: LogwardConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.storage.pool_size)
            .connect_lazy(&config.storage.db_url)
            .map_err(|e| anyhow::anyhow!("invalid db_url: {}", e))?;

        tracing::debug!("building components");

        // Detection side
        let catalog = Arc::new(
            PackCatalog::builtin().map_err(|e| anyhow::anyhow!("builtin packs invalid: {}", e))?,
        );
        let activation_store = Arc::new(ActivationStore::new(pool.clone()));
        let evaluator = Arc::new(RuleEvaluator::new(
            Arc::clone(&catalog),
            Arc::clone(&activation_store) as Arc<dyn ActivationSource>,
        ));
        let correlator = Arc::new(IncidentCorrelator::new(
            IncidentStore::new(pool.clone()),
            Duration::from_secs(config.detect.incident_window_secs),
        ));
        let pack_service = Arc::new(PackService::new(
            catalog,
            activation_store,
            Arc::clone(&evaluator),
        ));

        // Streaming side
        let registry = Arc::new(SubscriberRegistry::new());
        let listener = Arc::new(NotifyListener::new(
            registry,
            config.listener.channel.clone(),
            config.listener.max_reconnect_attempts,
        ));

        // Queue side
        let supervisor = Arc::new(QueueSupervisor::new(&config));
        let scan_queue: Arc<dyn Queue> = supervisor
            .queue(SCAN_QUEUE)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create scan queue: {}", e))?;

        // Ingestion side
        let log_store = Arc::new(LogStore::new(pool.clone()));
        let publisher = Arc::new(NotifyPublisher::new(
            pool.clone(),
            config.listener.channel.clone(),
        ));
        let (writer, post_commit) = IngestWriter::new(
            Arc::clone(&log_store),
            publisher,
            scan_queue,
            config.ingest.max_batch_size,
            config.ingest.post_commit_capacity,
            Duration::from_millis(config.ingest.post_commit_timeout_ms),
        );

        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!("orchestrator initialized");

        Ok(Self {
            config,
            pool,
            supervisor,
            listener,
            writer: Arc::new(writer),
            pack_service,
            log_store,
            evaluator,
            correlator,
            post_commit: Some(post_commit),
            cancel: CancellationToken::new(),
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start all components and block until a shutdown signal.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    /// - Listener terminal failure only logs an error; streaming is
    ///   best-effort and the rest of the pipeline keeps running.
    pub async fn run(&mut self) -> Result<()> {
        if !self.config.general.pid_file.is_empty() {
            write_pid_file(Path::new(&self.config.general.pid_file))?;
        }

        let run_result = self.run_inner().await;

        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }
        run_result
    }

    async fn run_inner(&mut self) -> Result<()> {
        // 1. Schemas
        logward_ingest::store::ensure_schema(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("log schema: {}", e))?;
        logward_detect::activation::ensure_schema(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("activation schema: {}", e))?;
        logward_detect::correlator::ensure_schema(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("incident schema: {}", e))?;

        // 2. Queue supervisor + scan worker
        self.supervisor
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("queue supervisor start: {}", e))?;

        let (worker_event_tx, worker_event_rx) = mpsc::channel(256);
        let processor = worker::scan_processor(
            Arc::clone(&self.log_store),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.correlator),
        );
        self.supervisor
            .worker(SCAN_QUEUE, processor, worker_event_tx)
            .await
            .map_err(|e| anyhow::anyhow!("scan worker: {}", e))?;

        let event_logger =
            worker::spawn_worker_event_logger(worker_event_rx, self.shutdown_tx.subscribe());

        // 3. Notification listener
        let mut listener_events = self
            .listener
            .initialize(self.config.storage.db_url.clone())
            .await;

        // 4. Post-commit runner
        let post_commit_task = self.post_commit.take().map(|runner| {
            let cancel = self.cancel.clone();
            tokio::spawn(runner.run(cancel))
        });

        // Uptime metric updater
        let uptime_task = if self.config.metrics.enabled {
            record_build_info();
            Some(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ))
        } else {
            None
        };

        tracing::info!("entering main event loop");
        let shutdown_signal = wait_for_shutdown_signal();
        tokio::pin!(shutdown_signal);
        loop {
            tokio::select! {
                signal = &mut shutdown_signal => {
                    let signal = signal?;
                    tracing::info!(signal, "shutdown signal received");
                    break;
                }
                event = listener_events.recv() => {
                    match event {
                        Some(ListenerEvent::TerminalFailure(err)) => {
                            // Streaming is best-effort; ingestion and detection keep running.
                            tracing::error!(error = %err, "listener gave up reconnecting");
                        }
                        None => {
                            tracing::debug!("listener event channel closed");
                            // Keep waiting for signals only.
                            let signal = (&mut shutdown_signal).await?;
                            tracing::info!(signal, "shutdown signal received");
                            break;
                        }
                    }
                }
            }
        }

        // Ordered shutdown
        tracing::info!("broadcasting shutdown to background tasks");
        self.cancel.cancel();
        let _ = self.shutdown_tx.send(());

        if let Some(task) = post_commit_task {
            let _ = task.await;
        }
        let _ = event_logger.await;
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        self.supervisor.shutdown().await;
        self.listener.shutdown().await;
        self.pool.close().await;

        tracing::info!("logward-daemon shut down");
        Ok(())
    }

    /// Current aggregated health snapshot.
    pub async fn health(&self) -> DaemonHealth {
        let listener = self.listener.status();
        let queues = self.supervisor.status().await;
        let status = aggregate_status(&listener, &queues);
        let uptime_secs = self.start_time.elapsed().as_secs();

        if self.config.metrics.enabled {
            metrics::gauge!(logward_core::metrics::DAEMON_UPTIME_SECONDS)
                .set(uptime_secs as f64);
        }

        DaemonHealth {
            status,
            uptime_secs,
            listener,
            queues,
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &LogwardConfig {
        &self.config
    }

    /// The ingest writer (exposed to the transport layer).
    pub fn writer(&self) -> Arc<IngestWriter> {
        Arc::clone(&self.writer)
    }

    /// The pack service (exposed to the tenant-admin layer).
    pub fn pack_service(&self) -> Arc<PackService> {
        Arc::clone(&self.pack_service)
    }

    /// The notification listener (exposed to the websocket layer).
    pub fn listener(&self) -> Arc<NotifyListener> {
        Arc::clone(&self.listener)
    }
}

/// Resolves when SIGTERM or SIGINT arrives, naming the signal.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for SIGINT")?;
            Ok("SIGINT")
        }
    }
}

/// Write this process id to the configured PID file.
///
/// An existing file means another instance already claimed it; the
/// daemon refuses to start rather than overwrite.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                anyhow::anyhow!(
                    "PID file {} already exists; is another logward-daemon running?",
                    path.display()
                )
            } else {
                e.into()
            }
        })?;
    writeln!(file, "{}", std::process::id())?;

    tracing::info!(path = %path.display(), "wrote PID file");
    Ok(())
}

/// Best-effort PID file cleanup on shutdown.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "could not remove PID file");
    }
}

/// Record the build-info gauge (always 1, with version label).
fn record_build_info() {
    metrics::gauge!(
        logward_core::metrics::DAEMON_BUILD_INFO,
        "version" => env!("CARGO_PKG_VERSION")
    )
    .set(1.0);
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::gauge!(logward_core::metrics::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn write_pid_file_creates_parent_directory() {
        let temp_dir = std::env::temp_dir();
        let test_dir = temp_dir.join(format!("logward_test_{}", std::process::id()));
        let pid_file = test_dir.join("subdir").join("test.pid");

        let result = write_pid_file(&pid_file);
        assert!(result.is_ok(), "write_pid_file should create parent directory");
        assert!(pid_file.exists());

        let content = fs::read_to_string(&pid_file).expect("should read PID file");
        assert_eq!(content.trim(), std::process::id().to_string());

        let _ = fs::remove_dir_all(&test_dir);
    }

    #[test]
    fn write_pid_file_refuses_existing_file() {
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("logward_test_dup_{}.pid", std::process::id()));
        fs::write(&pid_file, "12345").expect("should write initial PID file");

        let result = write_pid_file(&pid_file);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("already exists"));

        // The original file is left untouched
        let content = fs::read_to_string(&pid_file).expect("should read PID file");
        assert_eq!(content, "12345");

        let _ = fs::remove_file(&pid_file);
    }

    #[test]
    fn remove_pid_file_handles_nonexistent_gracefully() {
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("logward_test_nonexist_{}.pid", std::process::id()));
        assert!(!pid_file.exists());
        remove_pid_file(&pid_file);
    }
}
