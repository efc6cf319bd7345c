//! In-process loopback document store
//!
//! Behaves like the shared store from a single process: snapshots are pushed
//! on subscribe and after every write. Faults can be injected for the
//! subscribe and write paths, which is how tests drive offline transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{data_url, RemoteEvent, RemoteStore, Subscription};
use crate::error::{RemoteError, RemoteErrorKind};
use crate::model::{sort_newest_first, CounselingSession, Report};

#[derive(Default)]
struct Faults {
    subscribe: Option<RemoteErrorKind>,
    write: Option<RemoteErrorKind>,
}

/// Loopback store shared by clones of the same handle
#[derive(Clone)]
pub struct MemoryRemoteStore {
    reports: Arc<Mutex<HashMap<String, Report>>>,
    report_feed: Arc<watch::Sender<Vec<Report>>>,
    session_feed: Arc<watch::Sender<Vec<CounselingSession>>>,
    faults: Arc<Mutex<Faults>>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        let (report_feed, _) = watch::channel(Vec::new());
        let (session_feed, _) = watch::channel(Vec::new());
        Self {
            reports: Arc::new(Mutex::new(HashMap::new())),
            report_feed: Arc::new(report_feed),
            session_feed: Arc::new(session_feed),
            faults: Arc::new(Mutex::new(Faults::default())),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make new subscriptions fail with `kind` (or succeed again with `None`).
    pub fn fail_subscribe(&self, kind: Option<RemoteErrorKind>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.subscribe = kind;
        }
    }

    /// Make writes fail with `kind` (or succeed again with `None`).
    pub fn fail_writes(&self, kind: Option<RemoteErrorKind>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.write = kind;
        }
    }

    /// Current remote contents, newest first.
    pub fn reports(&self) -> Vec<Report> {
        self.report_feed.borrow().clone()
    }

    /// Identifiers of every successful write, in order.
    pub fn write_log(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Insert or replace a counseling session and push the new list.
    pub fn upsert_session(&self, session: CounselingSession) {
        self.session_feed.send_modify(|sessions| {
            sessions.retain(|s| s.id != session.id);
            sessions.push(session);
            sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        });
    }

    fn subscribe_fault(&self) -> Option<RemoteErrorKind> {
        self.faults.lock().ok().and_then(|f| f.subscribe)
    }

    fn write_fault(&self) -> Option<RemoteErrorKind> {
        self.faults.lock().ok().and_then(|f| f.write)
    }

    fn publish_reports(&self) {
        let mut snapshot: Vec<Report> = match self.reports.lock() {
            Ok(reports) => reports.values().cloned().collect(),
            Err(_) => return,
        };
        sort_newest_first(&mut snapshot);
        self.report_feed.send_replace(snapshot);
    }

    fn feed<T>(&self, mut source: watch::Receiver<Vec<T>>) -> Subscription<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let fault = self.subscribe_fault();
        Subscription::spawn(move |tx| async move {
            if let Some(kind) = fault {
                let _ = tx
                    .send(RemoteEvent::Error(RemoteError::new(kind, kind.diagnostic())))
                    .await;
                return;
            }
            loop {
                let snapshot = source.borrow_and_update().clone();
                if tx.send(RemoteEvent::Snapshot(snapshot)).await.is_err() {
                    return;
                }
                if source.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn is_enabled(&self) -> bool {
        true
    }

    fn subscribe_reports(&self) -> Subscription<Report> {
        self.feed(self.report_feed.subscribe())
    }

    fn subscribe_sessions(&self) -> Subscription<CounselingSession> {
        self.feed(self.session_feed.subscribe())
    }

    async fn write_report(&self, report: &Report) -> Result<(), RemoteError> {
        if let Some(kind) = self.write_fault() {
            return Err(RemoteError::new(kind, kind.diagnostic()));
        }
        if let Ok(mut reports) = self.reports.lock() {
            reports.insert(report.id.clone(), report.clone());
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(report.id.clone());
        }
        self.publish_reports();
        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String, RemoteError> {
        if let Some(kind) = self.write_fault() {
            return Err(RemoteError::new(kind, kind.diagnostic()));
        }
        Ok(data_url(&bytes, mime_type))
    }
}
