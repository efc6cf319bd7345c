//! Sync controller: keeps the report view reconciled with the shared store.
//!
//! State machine:
//!
//! ```text
//! CONNECTING ──snapshot──> SYNCED
//!      │                     │
//!      └──error/end──> OFFLINE <──┘
//!                        │
//!            retry timer └──> CONNECTING
//! ```
//!
//! Each snapshot is merged with the full LocalStore contents; records the
//! remote has not seen are written back in the background. While offline the
//! view is rebuilt from LocalStore alone and a fixed-interval timer retries
//! the whole subscribe sequence.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::merge::{merge_snapshot, MergeOutcome};
use super::status::{SyncState, SyncStatus};
use super::view::ReportView;
use crate::alert::AlertDetector;
use crate::config::Config;
use crate::error::{RemoteError, RemoteErrorKind, StorageError};
use crate::model::{now_millis, sort_newest_first, Report, ReportStatus};
use crate::remote::{write_with_timeout, RemoteEvent, RemoteStore, Subscription};
use crate::storage::LocalStore;

/// Floor for the retry timer period
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// Timing and identity settings for the controller
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub reconnect_interval: Duration,
    pub write_timeout: Duration,
    /// Stamped on status changes when the caller names nobody
    pub staff_name: String,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_interval: config.sync.reconnect_interval(),
            write_timeout: config.remote.write_timeout(),
            staff_name: config.node.staff_name.clone(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct SyncController {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    view: Arc<ReportView>,
    detector: Arc<AlertDetector>,
    state: watch::Sender<SyncState>,
    options: SyncOptions,
    /// Configuration error kinds already reported at error level
    reported: Mutex<HashSet<RemoteErrorKind>>,
}

impl SyncController {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        view: Arc<ReportView>,
        detector: Arc<AlertDetector>,
        options: SyncOptions,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::connecting());
        Self {
            local,
            remote,
            view,
            detector,
            state,
            options,
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// The subscription and the retry timer both live in this future, so
    /// stopping it tears them down together.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        if !self.remote.is_enabled() {
            info!("Remote store disabled, running from local storage only");
            self.go_offline(None).await;
            let _ = shutdown.wait_for(|stop| *stop).await;
            return;
        }

        let period = self.options.reconnect_interval.max(MIN_RECONNECT_INTERVAL);
        let mut retry = tokio::time::interval(period);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        retry.tick().await;

        let mut subscription = Some(self.connect());

        loop {
            tokio::select! {
                event = next_event(&mut subscription) => {
                    match event {
                        Some(RemoteEvent::Snapshot(items)) => {
                            self.apply_snapshot(items).await;
                        }
                        Some(RemoteEvent::Error(e)) => {
                            subscription = None;
                            self.go_offline(Some(&e)).await;
                            retry.reset();
                        }
                        None => {
                            subscription = None;
                            let e = RemoteError::network("subscription ended");
                            self.go_offline(Some(&e)).await;
                            retry.reset();
                        }
                    }
                }
                _ = retry.tick(), if subscription.is_none() => {
                    info!("Retrying document store connection");
                    subscription = Some(self.connect());
                }
                _ = shutdown.changed() => {
                    info!("Sync controller shutting down");
                    break;
                }
            }
        }
    }

    fn connect(&self) -> Subscription<Report> {
        self.state.send_modify(|s| *s = s.reconnecting());
        debug!("Subscribing to report stream");
        self.remote.subscribe_reports()
    }

    /// Merge a snapshot into the view, move to SYNCED and start repair.
    pub async fn apply_snapshot(&self, snapshot: Vec<Report>) {
        let local_only = {
            let writer = self.view.exclusive().await;
            let MergeOutcome { merged, local_only } = match self.local.get_all().await {
                Ok(local) => merge_snapshot(local, snapshot),
                Err(e) => {
                    error!(error = %e, "Failed to read local reports, showing remote snapshot only");
                    let mut merged = snapshot;
                    sort_newest_first(&mut merged);
                    MergeOutcome {
                        merged,
                        local_only: Vec::new(),
                    }
                }
            };
            debug!(
                merged = merged.len(),
                local_only = local_only.len(),
                "Merged remote snapshot"
            );
            self.detector.scan_reports(&merged);
            writer.publish(merged);
            local_only
        };

        let was = self.state.borrow().status;
        self.state.send_modify(|s| *s = s.synced(now_millis()));
        if was != SyncStatus::Synced {
            info!("Connected to document store");
        }

        self.spawn_repair(local_only);
    }

    fn spawn_repair(&self, local_only: Vec<Report>) {
        for report in local_only {
            let remote = self.remote.clone();
            let limit = self.options.write_timeout;
            tokio::spawn(async move {
                match write_with_timeout(remote.as_ref(), &report, limit).await {
                    Ok(()) => debug!(report_id = %report.id, "Repaired local-only report"),
                    Err(e) => {
                        warn!(report_id = %report.id, error = %e, "Background repair failed")
                    }
                }
            });
        }
    }

    /// Move to OFFLINE and rebuild the view from LocalStore alone.
    pub async fn go_offline(&self, cause: Option<&RemoteError>) {
        if let Some(e) = cause {
            self.log_remote_failure(e);
        }

        {
            let writer = self.view.exclusive().await;
            match self.local.get_all().await {
                Ok(mut reports) => {
                    sort_newest_first(&mut reports);
                    self.detector.scan_reports(&reports);
                    writer.publish(reports);
                }
                Err(e) => {
                    error!(error = %e, "Failed to load local reports, keeping previous view");
                }
            }
        }

        let was = self.state.borrow().status;
        self.state.send_modify(|s| *s = s.offline(cause));
        if was != SyncStatus::Offline {
            info!("Working offline from local storage");
        }
    }

    fn log_remote_failure(&self, e: &RemoteError) {
        if e.kind.is_configuration() {
            let first = self
                .reported
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(e.kind);
            if first {
                error!(kind = %e.kind, error = %e, "{}", e.kind.diagnostic());
            } else {
                debug!(kind = %e.kind, "Document store still misconfigured");
            }
        } else {
            warn!(kind = %e.kind, error = %e, "Document store unavailable, working offline");
        }
    }

    /// Persist a report on the device and add it to the view.
    ///
    /// Nothing reaches the view when the local write fails.
    pub async fn record_local(&self, report: &Report) -> Result<(), StorageError> {
        let writer = self.view.exclusive().await;
        self.local.put(report).await?;
        writer.upsert(report.clone());
        self.detector.scan_reports(&writer.current());
        Ok(())
    }

    /// Best-effort remote write, attempted only while SYNCED.
    ///
    /// Returns true when the shared store confirmed the write.
    pub async fn push_if_synced(&self, report: &Report) -> bool {
        if !self.is_synced() {
            debug!(report_id = %report.id, "Not synced, report stays on device");
            return false;
        }
        match write_with_timeout(self.remote.as_ref(), report, self.options.write_timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!(report_id = %report.id, error = %e, "Remote write failed, saved on device only");
                false
            }
        }
    }

    /// Change a report's status, stamping who did it and when.
    ///
    /// The change is durable locally before this returns. A remote push is
    /// attempted only while SYNCED and its failure is swallowed.
    pub async fn update_status(
        &self,
        id: &str,
        status: ReportStatus,
        processed_by: Option<&str>,
    ) -> Result<Report, StorageError> {
        let processed_by = processed_by.unwrap_or(&self.options.staff_name);

        let updated = {
            let writer = self.view.exclusive().await;
            let existing = match self.local.get(id).await? {
                Some(report) => report,
                // Reports filed on other devices are only in the view
                None => writer
                    .current()
                    .into_iter()
                    .find(|r| r.id == id)
                    .ok_or_else(|| StorageError::NotFound(id.to_string()))?,
            };
            let updated = existing.with_status(status, processed_by, now_millis());
            self.local.put(&updated).await?;
            writer.upsert(updated.clone());
            self.detector.scan_reports(&writer.current());
            updated
        };
        info!(report_id = %id, status = ?status, processed_by, "Report status updated");

        self.push_if_synced(&updated).await;
        Ok(updated)
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn is_synced(&self) -> bool {
        self.state.borrow().is_synced()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn view(&self) -> &Arc<ReportView> {
        &self.view
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }
}

async fn next_event<T>(subscription: &mut Option<Subscription<T>>) -> Option<RemoteEvent<T>> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}
