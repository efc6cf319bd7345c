//! Urgent-event detection over report and session lists
//!
//! Both scans share one watermark per staff session. The filter and the
//! advance happen under the same lock so interleaved scans can't alert the
//! same event twice.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::info;

use super::monitor::MonitoringHandle;
use super::watermark::AlertWatermark;
use crate::model::{now_millis, CounselingSession, Report};

/// Alerts buffered per subscriber before the slowest one starts lagging
pub const ALERT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// HIGH-urgency report still pending
    UrgentReport,
    /// Counseling session flagged as at risk
    FlaggedSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertItem {
    pub id: String,
    pub event_time: u64,
}

/// One-shot notification for staff
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub items: Vec<AlertItem>,
    /// Watermark after this alert
    pub watermark: u64,
    pub title: String,
    pub body: String,
    pub raised_at: u64,
}

pub struct AlertDetector {
    watermark: Mutex<AlertWatermark>,
    monitoring: MonitoringHandle,
    alerts: broadcast::Sender<Alert>,
    unread: watch::Sender<bool>,
}

impl AlertDetector {
    pub fn new(monitoring: MonitoringHandle) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_BUFFER);
        let (unread, _) = watch::channel(false);
        Self {
            watermark: Mutex::new(AlertWatermark::new()),
            monitoring,
            alerts,
            unread,
        }
    }

    /// Alert on pending HIGH-urgency reports newer than the watermark.
    pub fn scan_reports(&self, reports: &[Report]) -> Option<Alert> {
        let mut watermark = self.lock_watermark();
        let mut fresh: Vec<&Report> = reports
            .iter()
            .filter(|r| r.is_urgent_pending() && watermark.qualifies(r.timestamp))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        fresh.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let summary = fresh[0]
            .analysis
            .as_ref()
            .and_then(|a| a.summary.clone())
            .unwrap_or_else(|| "details are in the report list".to_string());
        let items = fresh
            .iter()
            .map(|r| AlertItem {
                id: r.id.clone(),
                event_time: r.timestamp,
            })
            .collect();

        Some(self.raise(
            &mut watermark,
            AlertKind::UrgentReport,
            items,
            "SOS EMERGENCY ALERT".to_string(),
            format!("New HIGH urgency report: {}", summary),
        ))
    }

    /// Alert on flagged sessions newer than the watermark, skipping the one
    /// currently being monitored.
    pub fn scan_sessions(&self, sessions: &[CounselingSession]) -> Option<Alert> {
        let mut watermark = self.lock_watermark();
        let items: Vec<AlertItem> = sessions
            .iter()
            .filter(|s| {
                s.is_flagged
                    && watermark.qualifies(s.last_activity)
                    && !self.monitoring.is_monitoring(&s.id)
            })
            .map(|s| AlertItem {
                id: s.id.clone(),
                event_time: s.last_activity,
            })
            .collect();
        if items.is_empty() {
            return None;
        }

        Some(self.raise(
            &mut watermark,
            AlertKind::FlaggedSession,
            items,
            "COUNSELING RISK ALERT".to_string(),
            "A student needs urgent counseling (high risk).".to_string(),
        ))
    }

    fn raise(
        &self,
        watermark: &mut AlertWatermark,
        kind: AlertKind,
        items: Vec<AlertItem>,
        title: String,
        body: String,
    ) -> Alert {
        let newest = items.iter().map(|i| i.event_time).max().unwrap_or(0);
        *watermark = watermark.advance(newest);

        let alert = Alert {
            kind,
            items,
            watermark: watermark.value(),
            title,
            body,
            raised_at: now_millis(),
        };
        info!(
            kind = ?alert.kind,
            items = alert.items.len(),
            watermark = alert.watermark,
            "{}",
            alert.title
        );

        self.unread.send_replace(true);
        // No subscribers is fine; the unread flag still records it
        let _ = self.alerts.send(alert.clone());
        alert
    }

    fn lock_watermark(&self) -> std::sync::MutexGuard<'_, AlertWatermark> {
        self.watermark.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn watermark(&self) -> u64 {
        self.lock_watermark().value()
    }

    /// Clear the unread flag once staff have seen the alert.
    pub fn acknowledge(&self) {
        self.unread.send_replace(false);
    }

    pub fn has_unread(&self) -> bool {
        *self.unread.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    pub fn subscribe_unread(&self) -> watch::Receiver<bool> {
        self.unread.subscribe()
    }

    pub fn monitoring(&self) -> &MonitoringHandle {
        &self.monitoring
    }
}
