//! Daemon setup and lifecycle management
//!
//! Wires the in-memory repositories and the dry-run collaborators: jobs are
//! logged and recorded instead of being sent to an orchestrator, and count
//! as running for `actuation.dry_run_execution_secs`. Artifact versions,
//! pins and vetoes come from seed files.

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::loader::load_delivery_configs;
use crate::scheduler::{CycleSummary, Scheduler};
use crate::seed::load_artifact_seeds;
use keel_actuation::{
    ClusterHandler, ClusterHandlerConfig, InMemoryCurrentStateProvider, PromotionEngine,
    RecordingTaskLauncher, ResourceReconciler,
};
use keel_constraints::{ConstraintRunner, InMemoryExecutionTrigger};
use keel_registry::{
    InMemoryArtifactRepository, InMemoryConstraintStateRepository,
    InMemoryDeliveryConfigRepository,
};
use keel_types::{EventSeverity, KeelEventEnvelope};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Keel Daemon
pub struct Daemon {
    config: DaemonConfig,
    delivery_configs: Arc<InMemoryDeliveryConfigRepository>,
    artifacts: Arc<InMemoryArtifactRepository>,
    launcher: Arc<RecordingTaskLauncher>,
    scheduler: Arc<Scheduler>,
    check_rx: mpsc::Receiver<()>,
    event_streams: Vec<broadcast::Receiver<KeelEventEnvelope>>,
}

impl Daemon {
    /// Create a new daemon with the given configuration
    pub fn new(config: DaemonConfig) -> Self {
        let delivery_configs = Arc::new(InMemoryDeliveryConfigRepository::new());
        let artifacts = Arc::new(InMemoryArtifactRepository::new());
        let states = Arc::new(InMemoryConstraintStateRepository::new());

        let runner = Arc::new(ConstraintRunner::standard(
            states,
            artifacts.clone(),
            Arc::new(InMemoryExecutionTrigger::new()),
        ));
        let promotion = Arc::new(PromotionEngine::new(artifacts.clone(), runner.clone()));

        let launcher = Arc::new(
            RecordingTaskLauncher::new()
                .with_execution_time(config.actuation.dry_run_execution())
                .with_history_limit(config.actuation.dry_run_history),
        );
        let handler = ClusterHandler::new(
            Arc::new(InMemoryCurrentStateProvider::new()),
            launcher.clone(),
            artifacts.clone(),
        )
        .with_config(ClusterHandlerConfig {
            job_timeout: config.actuation.job_timeout(),
        });
        let reconciler = Arc::new(ResourceReconciler::new().with_handler(Arc::new(handler)));

        let mut event_streams = vec![
            runner.subscribe(),
            promotion.subscribe(),
            reconciler.subscribe(),
        ];

        let (scheduler, check_rx) = Scheduler::new(
            config.scheduler.clone(),
            delivery_configs.clone(),
            promotion,
            reconciler,
        );

        event_streams.push(scheduler.subscribe());

        Self {
            config,
            delivery_configs,
            artifacts,
            launcher,
            scheduler,
            check_rx,
            event_streams,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    async fn load(&self) -> DaemonResult<usize> {
        let paths = &self.config.delivery_configs.paths;
        let count = load_delivery_configs(self.delivery_configs.as_ref(), paths).await?;
        if count == 0 {
            tracing::warn!("No delivery configs configured, nothing to check");
        }

        let seeds = load_artifact_seeds(
            self.delivery_configs.as_ref(),
            self.artifacts.as_ref(),
            &self.config.artifact_seeds.paths,
        )
        .await?;
        tracing::info!(
            versions = seeds.versions,
            pins = seeds.pins,
            vetoes = seeds.vetoes,
            "Artifact seeds applied"
        );
        Ok(count)
    }

    /// Load delivery configs and run a single check cycle
    pub async fn run_once(self) -> DaemonResult<CycleSummary> {
        self.load().await?;
        for rx in self.event_streams {
            tokio::spawn(log_events(rx));
        }
        self.scheduler.run_cycle().await
    }

    /// Run until interrupted
    pub async fn run(self) -> DaemonResult<()> {
        let count = self.load().await?;
        tracing::info!(
            delivery_configs = count,
            interval_secs = self.config.scheduler.check_interval_secs,
            "Keel daemon started"
        );

        for rx in self.event_streams {
            tokio::spawn(log_events(rx));
        }

        let scheduler = self.scheduler.clone();
        let check_rx = self.check_rx;
        let loop_handle = tokio::spawn(async move {
            scheduler.start(check_rx).await;
        });

        shutdown_signal().await;
        tracing::info!("Keel daemon shutting down");

        self.scheduler.stop().await;
        // wake the loop so it sees the flag
        self.scheduler.trigger_check().await;
        if let Err(e) = loop_handle.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }

        Ok(())
    }
}

/// Forward events to the log
async fn log_events(mut rx: broadcast::Receiver<KeelEventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => match envelope.severity {
                EventSeverity::Error | EventSeverity::Warning => tracing::warn!(
                    source = ?envelope.source,
                    correlation_id = envelope.correlation_id.as_deref().unwrap_or(""),
                    event = ?envelope.event,
                    "Keel event"
                ),
                EventSeverity::Info => tracing::info!(
                    source = ?envelope.source,
                    correlation_id = envelope.correlation_id.as_deref().unwrap_or(""),
                    event = ?envelope.event,
                    "Keel event"
                ),
                EventSeverity::Debug => tracing::debug!(
                    source = ?envelope.source,
                    event = ?envelope.event,
                    "Keel event"
                ),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagging, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
