//! Published report list
//!
//! Every write to the list goes through a [`ViewWriter`], which holds the
//! view lock. Callers that derive the list from LocalStore read the store
//! while holding the writer so a concurrent submission is never overwritten
//! by a merge computed before it landed.

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::model::{sort_newest_first, Report};

/// Merged, newest-first report list shared with readers
pub struct ReportView {
    tx: watch::Sender<Vec<Report>>,
    lock: Mutex<()>,
}

/// Exclusive write access to a [`ReportView`]
pub struct ViewWriter<'a> {
    _lock: MutexGuard<'a, ()>,
    tx: &'a watch::Sender<Vec<Report>>,
}

impl ReportView {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            tx,
            lock: Mutex::new(()),
        }
    }

    /// Wait for exclusive write access.
    pub async fn exclusive(&self) -> ViewWriter<'_> {
        ViewWriter {
            _lock: self.lock.lock().await,
            tx: &self.tx,
        }
    }

    pub fn current(&self) -> Vec<Report> {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Report>> {
        self.tx.subscribe()
    }
}

impl Default for ReportView {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewWriter<'_> {
    /// Replace the whole list.
    pub fn publish(&self, mut reports: Vec<Report>) {
        sort_newest_first(&mut reports);
        self.tx.send_replace(reports);
    }

    /// Insert or replace one report by identifier.
    pub fn upsert(&self, report: Report) {
        self.tx.send_modify(|reports| {
            reports.retain(|r| r.id != report.id);
            reports.push(report);
            sort_newest_first(reports);
        });
    }

    /// Current list as seen by this writer.
    pub fn current(&self) -> Vec<Report> {
        self.tx.borrow().clone()
    }
}
