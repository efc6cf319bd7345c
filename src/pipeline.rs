//! Submission pipeline: draft in, accepted report out.
//!
//! A report is accepted once it is durable on the device. Everything after
//! that (remote write, alerting) is best effort, and the returned
//! [`Delivery`] says how far it got.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::classifier::{sos_analysis, Classifier};
use crate::error::SubmitError;
use crate::model::{
    generate_report_id, now_millis, Analysis, GeoPoint, MediaAttachment, Report, ReportDraft,
    ReportStatus, ReportType, REPORT_PREFIX, SOS_PREFIX,
};
use crate::rate_limit::RateLimiter;
use crate::remote::{data_url, upload_with_timeout};
use crate::sync::SyncController;

const DEFAULT_AUDIO_MIME: &str = "audio/webm";
const DEFAULT_MIME: &str = "application/octet-stream";

/// How far an accepted report got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Durable on this device only
    SavedToDevice,
    /// Also confirmed by the shared store
    Synchronized,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub report: Report,
    pub delivery: Delivery,
}

pub struct SubmissionPipeline {
    limiter: Arc<RateLimiter>,
    sync: Arc<SyncController>,
    classifier: Option<Arc<dyn Classifier>>,
    upload_timeout: Duration,
}

impl SubmissionPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        sync: Arc<SyncController>,
        classifier: Option<Arc<dyn Classifier>>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            limiter,
            sync,
            classifier,
            upload_timeout,
        }
    }

    /// Submit a report drafted by a community member.
    pub async fn submit(&self, draft: ReportDraft) -> Result<Submission, SubmitError> {
        let has_media = draft.media.as_ref().is_some_and(|m| !m.bytes.is_empty());
        if draft.content.trim().is_empty() && !has_media {
            return Err(SubmitError::Empty);
        }

        let now = now_millis();
        let reservation = self.limiter.admit(now).await?;

        let analysis = match draft.analysis {
            Some(analysis) => Some(analysis),
            None => self.classify(&draft.content, draft.report_type).await,
        };
        if let Some(ref analysis) = analysis {
            if !analysis.is_incident {
                let reason = analysis
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| "content does not describe an incident".to_string());
                info!(reason = %reason, "Submission rejected by classifier");
                self.limiter.release(reservation).await;
                return Err(SubmitError::NotAnIncident { reason });
            }
        }

        let (media_url, media_mime_type) = match draft.media {
            Some(media) if !media.bytes.is_empty() => {
                let (url, mime) = self.store_media(media, draft.report_type).await;
                (Some(url), Some(mime))
            }
            _ => (None, None),
        };

        let reporter = draft.reporter;
        let identified = !reporter.is_anonymous;
        let report = Report {
            id: generate_report_id(REPORT_PREFIX, now),
            timestamp: now,
            report_type: draft.report_type,
            content: draft.content,
            media_url,
            media_mime_type,
            status: ReportStatus::Pending,
            analysis,
            location: draft.location,
            is_anonymous: reporter.is_anonymous,
            student_name: reporter.full_name.filter(|_| identified),
            student_class: reporter.student_class.filter(|_| identified),
            national_id: reporter.national_id.filter(|_| identified),
            processed_by: None,
            processed_at: None,
        };

        let result = self.accept(report).await;
        if result.is_err() {
            self.limiter.release(reservation).await;
        }
        result
    }

    /// File an emergency report. Skips classification and throttling.
    pub async fn submit_sos(&self, location: Option<GeoPoint>) -> Result<Submission, SubmitError> {
        let now = now_millis();
        let position = match location {
            Some(p) => format!(
                "GPS position: [{:.6}, {:.6}] (accuracy ~{}m)\nMap: {}",
                p.lat,
                p.lng,
                p.accuracy.round() as i64,
                p.maps_link()
            ),
            None => "GPS position: unavailable (location error or permission denied)".to_string(),
        };
        let content = format!(
            "EMERGENCY SOS SIGNAL\n\nThe emergency button was pressed. Security staff and \
             the school board must intervene immediately.\n\n{}\n\nStatus: in danger.",
            position
        );

        let report = Report {
            id: generate_report_id(SOS_PREFIX, now),
            timestamp: now,
            report_type: ReportType::Text,
            content,
            media_url: None,
            media_mime_type: None,
            status: ReportStatus::Pending,
            analysis: Some(sos_analysis()),
            location: location.map(|p| format!("{:.6},{:.6}", p.lat, p.lng)),
            is_anonymous: true,
            student_name: None,
            student_class: None,
            national_id: None,
            processed_by: None,
            processed_at: None,
        };
        warn!(report_id = %report.id, has_location = location.is_some(), "SOS triggered");

        self.accept(report).await
    }

    /// Persist, publish, then try the shared store.
    async fn accept(&self, report: Report) -> Result<Submission, SubmitError> {
        if let Err(e) = self.sync.record_local(&report).await {
            error!(report_id = %report.id, error = %e, "Report could not be saved on device");
            return Err(SubmitError::Durability(e));
        }

        let delivery = if self.sync.push_if_synced(&report).await {
            Delivery::Synchronized
        } else {
            Delivery::SavedToDevice
        };
        info!(report_id = %report.id, delivery = ?delivery, "Report accepted");

        Ok(Submission { report, delivery })
    }

    async fn classify(&self, content: &str, report_type: ReportType) -> Option<Analysis> {
        let classifier = self.classifier.as_ref()?;
        match classifier.classify(content, report_type).await {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(error = %e, "Classifier failed, submitting unclassified");
                None
            }
        }
    }

    /// Upload media, falling back to an inline data URL.
    async fn store_media(&self, media: MediaAttachment, report_type: ReportType) -> (String, String) {
        let mime = media.mime_type.unwrap_or_else(|| match report_type {
            ReportType::Audio => DEFAULT_AUDIO_MIME.to_string(),
            _ => DEFAULT_MIME.to_string(),
        });

        let remote = self.sync.remote();
        if remote.is_enabled() {
            match upload_with_timeout(remote.as_ref(), media.bytes.clone(), &mime, self.upload_timeout)
                .await
            {
                Ok(url) => return (url, mime),
                Err(e) => warn!(error = %e, "Media upload failed, embedding inline"),
            }
        }
        (data_url(&media.bytes, &mime), mime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertDetector, MonitoringHandle};
    use crate::error::{ClassifierError, RemoteErrorKind};
    use crate::model::{Reporter, UrgencyLevel};
    use crate::rate_limit::RateLimitPolicy;
    use crate::remote::{DisabledRemoteStore, MemoryRemoteStore, RemoteStore};
    use crate::storage::{LocalStore, SqliteStore};
    use crate::sync::{ReportView, SyncOptions};
    use async_trait::async_trait;

    struct FixedClassifier(Result<Analysis, String>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _: &str, _: ReportType) -> Result<Analysis, ClassifierError> {
            self.0.clone().map_err(ClassifierError)
        }
    }

    fn pipeline(
        remote: Arc<dyn RemoteStore>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> (SubmissionPipeline, Arc<SqliteStore>) {
        let local = Arc::new(SqliteStore::open_in_memory(100).unwrap());
        let sync = Arc::new(SyncController::new(
            local.clone(),
            remote,
            Arc::new(ReportView::new()),
            Arc::new(AlertDetector::new(MonitoringHandle::new())),
            SyncOptions::default(),
        ));
        let limiter = Arc::new(RateLimiter::new(local.clone(), RateLimitPolicy::default()));
        let pipeline = SubmissionPipeline::new(limiter, sync, classifier, Duration::from_secs(45));
        (pipeline, local)
    }

    fn draft(content: &str) -> ReportDraft {
        ReportDraft {
            content: content.to_string(),
            reporter: Reporter::anonymous(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_draft_rejected() {
        let (pipeline, local) = pipeline(Arc::new(DisabledRemoteStore), None);
        assert!(matches!(
            pipeline.submit(draft("   ")).await,
            Err(SubmitError::Empty)
        ));
        assert!(local.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_an_incident_writes_nothing() {
        let verdict = Analysis {
            is_incident: false,
            rejection_reason: Some("homework question".into()),
            urgency: None,
            summary: None,
            category: vec![],
            confidence: None,
        };
        let (pipeline, local) = pipeline(
            Arc::new(DisabledRemoteStore),
            Some(Arc::new(FixedClassifier(Ok(verdict)))),
        );
        match pipeline.submit(draft("what is 2+2")).await {
            Err(SubmitError::NotAnIncident { reason }) => assert_eq!(reason, "homework question"),
            other => panic!("unexpected result: {:?}", other.map(|s| s.report.id)),
        }
        assert!(local.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_classifier_failure_submits_unclassified() {
        let (pipeline, local) = pipeline(
            Arc::new(DisabledRemoteStore),
            Some(Arc::new(FixedClassifier(Err("quota exceeded".into())))),
        );
        let submission = pipeline.submit(draft("someone took my bag")).await.unwrap();
        assert!(submission.report.analysis.is_none());
        assert_eq!(submission.delivery, Delivery::SavedToDevice);
        assert_eq!(local.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identity_dropped_for_anonymous_reporter() {
        let (pipeline, _local) = pipeline(Arc::new(DisabledRemoteStore), None);
        let mut d = draft("bullying in class 9A");
        d.reporter = Reporter {
            is_anonymous: true,
            full_name: Some("Someone".into()),
            student_class: Some("9A".into()),
            national_id: None,
        };
        let submission = pipeline.submit(d).await.unwrap();
        assert!(submission.report.student_name.is_none());
        assert!(submission.report.student_class.is_none());
        assert!(submission.report.id.starts_with("RPT-"));
    }

    #[tokio::test]
    async fn test_audio_without_mime_falls_back_to_inline_webm() {
        let remote = MemoryRemoteStore::new();
        remote.fail_writes(Some(RemoteErrorKind::Network));
        let (pipeline, _local) = pipeline(Arc::new(remote), None);

        let d = ReportDraft {
            report_type: ReportType::Audio,
            media: Some(MediaAttachment {
                bytes: vec![1, 2, 3],
                mime_type: None,
            }),
            reporter: Reporter::anonymous(),
            ..Default::default()
        };
        let submission = pipeline.submit(d).await.unwrap();
        assert_eq!(submission.report.media_mime_type.as_deref(), Some("audio/webm"));
        assert_eq!(
            submission.report.media_url.as_deref(),
            Some("data:audio/webm;base64,AQID")
        );
    }

    #[tokio::test]
    async fn test_sos_is_high_urgency_and_bypasses_limiter() {
        let (pipeline, local) = pipeline(Arc::new(DisabledRemoteStore), None);
        for i in 0..5 {
            pipeline.submit(draft(&format!("report {}", i))).await.unwrap();
        }
        assert!(matches!(
            pipeline.submit(draft("one more")).await,
            Err(SubmitError::Throttled(_))
        ));

        let sos = pipeline
            .submit_sos(Some(GeoPoint {
                lat: 21.028511,
                lng: 105.804817,
                accuracy: 12.4,
            }))
            .await
            .unwrap();
        assert!(sos.report.id.starts_with("SOS-"));
        assert_eq!(sos.report.urgency(), Some(UrgencyLevel::High));
        assert!(sos.report.content.contains("query=21.028511,105.804817"));
        assert_eq!(local.get_all().await.unwrap().len(), 6);
    }
}
