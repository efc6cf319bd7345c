//! API route handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, SharedState};
use crate::model::{
    Analysis, GeoPoint, MediaAttachment, Report, ReportDraft, ReportStatus, ReportType, Reporter,
};
use crate::pipeline::Submission;
use crate::sync::SyncState;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Status ===

#[derive(Serialize)]
pub struct StatusResponse {
    pub device_id: String,
    pub hostname: String,
    pub version: String,
    pub sync: SyncState,
    /// Reports in the merged view
    pub report_count: usize,
    /// Reports durable on this device
    pub stored_reports: usize,
    pub unread_high_risk: bool,
    pub alert_watermark: u64,
    pub monitoring: Option<String>,
}

/// GET /api/status
pub async fn api_status(State(state): State<SharedState>) -> Result<Json<StatusResponse>, ApiError> {
    let node = &state.node;
    Ok(Json(StatusResponse {
        device_id: node.config.node.device_id.clone(),
        hostname: hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sync: node.sync.state(),
        report_count: node.sync.view().len(),
        stored_reports: node.local.count().await?,
        unread_high_risk: node.detector.has_unread(),
        alert_watermark: node.detector.watermark(),
        monitoring: node.monitoring.current(),
    }))
}

// === Reports ===

/// GET /api/reports
pub async fn api_reports(State(state): State<SharedState>) -> Json<Vec<Report>> {
    Json(state.node.sync.view().current())
}

/// POST /api/reports
#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub report_type: ReportType,
    #[serde(default)]
    pub content: String,
    /// Attachment bytes, standard base64
    #[serde(default)]
    pub media_base64: Option<String>,
    #[serde(default)]
    pub media_mime_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Omitted means anonymous
    #[serde(default)]
    pub reporter: Option<Reporter>,
    #[serde(default)]
    pub analysis: Option<Analysis>,
}

impl SubmitRequest {
    fn into_draft(self) -> Result<ReportDraft, ApiError> {
        let media = match self.media_base64 {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| {
                        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid media encoding: {}", e))
                    })?;
                Some(MediaAttachment {
                    bytes,
                    mime_type: self.media_mime_type,
                })
            }
            None => None,
        };

        Ok(ReportDraft {
            report_type: self.report_type,
            content: self.content,
            media,
            location: self.location,
            reporter: self.reporter.unwrap_or_else(Reporter::anonymous),
            analysis: self.analysis,
        })
    }
}

pub async fn api_submit(
    State(state): State<SharedState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let draft = req.into_draft()?;
    let submission = state.node.pipeline.submit(draft).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// POST /api/reports/:id/status
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ReportStatus,
    #[serde(default)]
    pub processed_by: Option<String>,
}

pub async fn api_update_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Report>, ApiError> {
    let report = state
        .node
        .sync
        .update_status(&id, req.status, req.processed_by.as_deref())
        .await?;
    Ok(Json(report))
}

// === SOS ===

/// POST /api/sos - `{lat, lng, accuracy}` or `{}` when no fix is available
#[derive(Debug, Default, Deserialize)]
pub struct SosRequest {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl SosRequest {
    fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint {
                lat,
                lng,
                accuracy: self.accuracy.unwrap_or(0.0),
            }),
            _ => None,
        }
    }
}

pub async fn api_sos(
    State(state): State<SharedState>,
    Json(req): Json<SosRequest>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let submission = state.node.pipeline.submit_sos(req.location()).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

// === Alerts and monitoring ===

/// POST /api/alerts/ack
pub async fn api_ack_alerts(State(state): State<SharedState>) -> StatusCode {
    state.node.detector.acknowledge();
    StatusCode::NO_CONTENT
}

/// PUT /api/monitoring
#[derive(Debug, Deserialize)]
pub struct MonitoringRequest {
    pub session_id: String,
}

pub async fn api_start_monitoring(
    State(state): State<SharedState>,
    Json(req): Json<MonitoringRequest>,
) -> StatusCode {
    let mut slot = state.monitor.lock().await;
    // Release the old exemption before opening the new one
    slot.take();
    *slot = Some(state.node.monitoring.open(req.session_id));
    StatusCode::NO_CONTENT
}

/// DELETE /api/monitoring
pub async fn api_stop_monitoring(State(state): State<SharedState>) -> StatusCode {
    if let Some(guard) = state.monitor.lock().await.take() {
        info!(session_id = guard.session_id(), "Monitoring closed");
    }
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::api::ApiState;
    use crate::config::Config;
    use crate::node::Node;
    use crate::remote::DisabledRemoteStore;
    use crate::storage::SqliteStore;

    fn state() -> SharedState {
        let node = Node::with_stores(
            Config::default(),
            Arc::new(SqliteStore::open_in_memory(100).unwrap()),
            Arc::new(DisabledRemoteStore),
            None,
        );
        Arc::new(ApiState::new(Arc::new(node)))
    }

    fn text(content: &str) -> SubmitRequest {
        SubmitRequest {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_then_list() {
        let state = state();
        let (status, Json(submission)) = api_submit(State(state.clone()), Json(text("theft")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(submission.report.is_anonymous);

        let Json(reports) = api_reports(State(state)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, submission.report.id);
    }

    #[tokio::test]
    async fn test_sixth_submission_is_429_with_retry_after() {
        let state = state();
        for i in 0..5 {
            api_submit(State(state.clone()), Json(text(&format!("r{}", i))))
                .await
                .unwrap();
        }
        let err = api_submit(State(state), Json(text("r5"))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_invalid_media_is_400() {
        let req = SubmitRequest {
            media_base64: Some("not base64!".into()),
            ..Default::default()
        };
        let err = api_submit(State(state()), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_update_unknown_is_404() {
        let err = api_update_status(
            State(state()),
            Path("RPT-0-000000".to_string()),
            Json(StatusUpdateRequest {
                status: ReportStatus::Resolved,
                processed_by: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sos_raises_unread_flag_until_ack() {
        let state = state();
        api_sos(State(state.clone()), Json(SosRequest::default()))
            .await
            .unwrap();
        assert!(state.node.detector.has_unread());

        assert_eq!(api_ack_alerts(State(state.clone())).await, StatusCode::NO_CONTENT);
        assert!(!state.node.detector.has_unread());
    }

    #[tokio::test]
    async fn test_monitoring_put_and_delete() {
        let state = state();
        api_start_monitoring(
            State(state.clone()),
            Json(MonitoringRequest {
                session_id: "s1".into(),
            }),
        )
        .await;
        // Reopening the same session keeps it monitored
        api_start_monitoring(
            State(state.clone()),
            Json(MonitoringRequest {
                session_id: "s1".into(),
            }),
        )
        .await;
        assert_eq!(state.node.monitoring.current().as_deref(), Some("s1"));

        api_stop_monitoring(State(state.clone())).await;
        assert!(state.node.monitoring.current().is_none());
    }
}
