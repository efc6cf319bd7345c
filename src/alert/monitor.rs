//! Which counseling session staff are watching right now
//!
//! A session that is open in front of a staff member must not alert that same
//! member about its own updates. The exemption lasts exactly as long as the
//! [`MonitorGuard`] returned by [`MonitoringHandle::open`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Owner of the currently monitored session identifier
#[derive(Clone)]
pub struct MonitoringHandle {
    current: Arc<watch::Sender<Option<String>>>,
}

/// Live monitoring exemption. Dropping it releases the exemption.
#[must_use = "the exemption ends when the guard is dropped"]
pub struct MonitorGuard {
    handle: MonitoringHandle,
    session_id: String,
}

impl MonitoringHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            current: Arc::new(tx),
        }
    }

    /// Start watching `session_id`, replacing any earlier exemption.
    pub fn open(&self, session_id: impl Into<String>) -> MonitorGuard {
        let session_id = session_id.into();
        debug!(session_id, "Monitoring session");
        self.current.send_replace(Some(session_id.clone()));
        MonitorGuard {
            handle: self.clone(),
            session_id,
        }
    }

    /// Release whatever exemption is active.
    pub fn close(&self) {
        self.current.send_replace(None);
    }

    pub fn current(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    pub fn is_monitoring(&self, session_id: &str) -> bool {
        self.current.borrow().as_deref() == Some(session_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }
}

impl Default for MonitoringHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        // A later open() for another session owns the slot now
        self.handle.current.send_if_modified(|current| {
            if current.as_deref() == Some(self.session_id.as_str()) {
                *current = None;
                true
            } else {
                false
            }
        });
        debug!(session_id = %self.session_id, "Stopped monitoring session");
    }
}
