//! Runtime wiring
//!
//! Builds the stores, controller, detector and pipeline from configuration
//! and runs the session-level tasks. Every task watches one shutdown signal,
//! so [`NodeHandle::shutdown`] stops the subscriptions and their retry timers
//! together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertDetector, MonitoringHandle};
use crate::classifier::Classifier;
use crate::config::{Config, RemoteBackend};
use crate::error::StorageError;
use crate::pipeline::SubmissionPipeline;
use crate::rate_limit::RateLimiter;
use crate::remote::{
    DisabledRemoteStore, HttpRemoteStore, MemoryRemoteStore, RemoteEvent, RemoteStore,
};
use crate::storage::SqliteStore;
use crate::sync::{ReportView, SyncController, SyncOptions};

/// Everything one device runs, wired together
pub struct Node {
    pub config: Config,
    pub local: Arc<SqliteStore>,
    pub limiter: Arc<RateLimiter>,
    pub sync: Arc<SyncController>,
    pub detector: Arc<AlertDetector>,
    pub monitoring: MonitoringHandle,
    pub pipeline: Arc<SubmissionPipeline>,
}

/// Running session tasks
pub struct NodeHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Open the on-device store and connect the configured remote backend.
    pub fn open(config: Config) -> Result<Self, StorageError> {
        let local = Arc::new(SqliteStore::open(
            &config.node.data_dir,
            config.storage.max_reports,
        )?);
        let remote = remote_from_config(&config);
        Ok(Self::with_stores(config, local, remote, None))
    }

    /// Wire a node around stores the caller already built.
    pub fn with_stores(
        config: Config,
        local: Arc<SqliteStore>,
        remote: Arc<dyn RemoteStore>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Self {
        let monitoring = MonitoringHandle::new();
        let detector = Arc::new(AlertDetector::new(monitoring.clone()));
        let sync = Arc::new(SyncController::new(
            local.clone(),
            remote,
            Arc::new(ReportView::new()),
            detector.clone(),
            SyncOptions::from_config(&config),
        ));
        let limiter = Arc::new(RateLimiter::new(local.clone(), config.rate_limit.policy()));
        let pipeline = Arc::new(SubmissionPipeline::new(
            limiter.clone(),
            sync.clone(),
            classifier,
            config.remote.upload_timeout(),
        ));

        Self {
            config,
            local,
            limiter,
            sync,
            detector,
            monitoring,
            pipeline,
        }
    }

    /// Spawn the report sync, the session feed and the alert sink.
    pub fn start(&self) -> NodeHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let sync = self.sync.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { sync.run(rx).await }));

        tasks.push(tokio::spawn(run_session_feed(
            self.sync.remote().clone(),
            self.detector.clone(),
            self.config.sync.reconnect_interval(),
            shutdown_rx.clone(),
        )));

        tasks.push(tokio::spawn(run_alert_sink(
            self.detector.subscribe(),
            shutdown_rx,
        )));

        info!(device_id = %self.config.node.device_id, "Node started");
        NodeHandle { shutdown, tasks }
    }
}

impl NodeHandle {
    /// Signal every task and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Node task ended abnormally");
            }
        }
        info!("Node stopped");
    }
}

fn remote_from_config(config: &Config) -> Arc<dyn RemoteStore> {
    if !config.remote.enabled {
        return Arc::new(DisabledRemoteStore);
    }
    match config.remote.backend {
        RemoteBackend::Memory => {
            info!("Using in-process document store");
            Arc::new(MemoryRemoteStore::new())
        }
        RemoteBackend::Http => match HttpRemoteStore::new(&config.remote) {
            Ok(store) => {
                info!(base_url = %config.remote.base_url, "Using document store gateway");
                Arc::new(store)
            }
            Err(e) => {
                error!(error = %e, "Document store client could not be built, running local-only");
                Arc::new(DisabledRemoteStore)
            }
        },
    }
}

/// Feed counseling-session snapshots to the detector, resubscribing on a
/// fixed interval after failures.
async fn run_session_feed(
    remote: Arc<dyn RemoteStore>,
    detector: Arc<AlertDetector>,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if !remote.is_enabled() {
        let _ = shutdown.wait_for(|stop| *stop).await;
        return;
    }

    loop {
        let mut subscription = remote.subscribe_sessions();
        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(RemoteEvent::Snapshot(sessions)) => {
                        debug!(sessions = sessions.len(), "Session snapshot received");
                        detector.scan_sessions(&sessions);
                    }
                    Some(RemoteEvent::Error(e)) => {
                        debug!(error = %e, "Session feed failed");
                        break;
                    }
                    None => break,
                },
                _ = shutdown.changed() => return,
            }
        }
        drop(subscription);

        tokio::select! {
            _ = tokio::time::sleep(retry_interval) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Surface alerts to whoever is watching the node's output.
async fn run_alert_sink(
    mut alerts: broadcast::Receiver<crate::alert::Alert>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            alert = alerts.recv() => match alert {
                Ok(alert) => {
                    warn!(
                        kind = ?alert.kind,
                        items = alert.items.len(),
                        "{}: {}",
                        alert.title,
                        alert.body
                    );
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Alert sink fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_remote_selected_when_switched_off() {
        let mut config = Config::default();
        config.remote.enabled = false;
        assert!(!remote_from_config(&config).is_enabled());

        config.remote.enabled = true;
        config.remote.backend = RemoteBackend::Memory;
        assert!(remote_from_config(&config).is_enabled());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.remote.backend = RemoteBackend::Memory;

        let node = Node::open(config).unwrap();
        let handle = node.start();
        handle.shutdown().await;
    }
}
