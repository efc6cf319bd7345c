//! Shared document store contract
//!
//! The remote store pushes the full result set on connect and on every
//! change, and upserts records by identifier. Two adapters are provided:
//! - `http`: gateway client (REST writes, WebSocket push)
//! - `memory`: in-process loopback store with fault injection

pub mod http;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RemoteError;
use crate::model::{CounselingSession, Report};

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Buffered events per subscription before the producer waits
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// One delivery on a subscription stream
#[derive(Debug, Clone)]
pub enum RemoteEvent<T> {
    /// Full current result set
    Snapshot(Vec<T>),
    /// The subscription failed; no further events follow
    Error(RemoteError),
}

/// Live subscription to a remote collection.
///
/// Dropping the handle unsubscribes: the task feeding it is aborted.
pub struct Subscription<T> {
    events: mpsc::Receiver<RemoteEvent<T>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub fn new(events: mpsc::Receiver<RemoteEvent<T>>, task: JoinHandle<()>) -> Self {
        Self { events, task }
    }

    /// Spawn `feed` with the sending half of a fresh channel.
    pub fn spawn<F, Fut>(feed: F) -> Self
    where
        F: FnOnce(mpsc::Sender<RemoteEvent<T>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(feed(tx));
        Self::new(rx, task)
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<RemoteEvent<T>> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Shared, eventually-consistent document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// False when no backend is configured; callers stay local-only.
    fn is_enabled(&self) -> bool;

    /// Subscribe to all reports, newest first.
    fn subscribe_reports(&self) -> Subscription<Report>;

    /// Subscribe to counseling sessions, most recently active first.
    fn subscribe_sessions(&self) -> Subscription<CounselingSession>;

    /// Idempotent upsert by identifier; last write wins.
    async fn write_report(&self, report: &Report) -> Result<(), RemoteError>;

    /// Store a media attachment and return the URL it is served from.
    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String, RemoteError>;
}

/// Write a report, treating an elapsed `limit` as a timeout failure.
pub async fn write_with_timeout(
    remote: &dyn RemoteStore,
    report: &Report,
    limit: Duration,
) -> Result<(), RemoteError> {
    match tokio::time::timeout(limit, remote.write_report(report)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(format!(
            "write of {} timed out after {}s",
            report.id,
            limit.as_secs()
        ))),
    }
}

/// Upload media, treating an elapsed `limit` as a timeout failure.
pub async fn upload_with_timeout(
    remote: &dyn RemoteStore,
    bytes: Vec<u8>,
    mime_type: &str,
    limit: Duration,
) -> Result<String, RemoteError> {
    match tokio::time::timeout(limit, remote.upload_media(bytes, mime_type)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(format!(
            "upload timed out after {}s",
            limit.as_secs()
        ))),
    }
}

/// Inline media as a `data:` URL, for when no upload is possible.
pub fn data_url(bytes: &[u8], mime_type: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime_type, encoded)
}

/// Store used when the remote backend is switched off.
pub struct DisabledRemoteStore;

#[async_trait]
impl RemoteStore for DisabledRemoteStore {
    fn is_enabled(&self) -> bool {
        false
    }

    fn subscribe_reports(&self) -> Subscription<Report> {
        Subscription::spawn(|_tx| async {})
    }

    fn subscribe_sessions(&self) -> Subscription<CounselingSession> {
        Subscription::spawn(|_tx| async {})
    }

    async fn write_report(&self, _report: &Report) -> Result<(), RemoteError> {
        Err(RemoteError::network("remote store disabled"))
    }

    async fn upload_media(&self, _bytes: Vec<u8>, _mime_type: &str) -> Result<String, RemoteError> {
        Err(RemoteError::network("remote store disabled"))
    }
}
