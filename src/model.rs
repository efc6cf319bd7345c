//! Report and counseling-session records
//!
//! Field names serialize in camelCase so documents written by the device
//! match the layout already held by the shared document store. The verdict
//! keeps the store's names (`aiAnalysis`, `isSchoolViolence`,
//! `confidenceScore`).

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identifier prefix for reports filed through the regular form.
pub const REPORT_PREFIX: &str = "RPT";

/// Identifier prefix for emergency (SOS) reports.
pub const SOS_PREFIX: &str = "SOS";

/// Medium a report was submitted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
}

/// Urgency tag assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyLevel {
    High,
    Medium,
    Low,
}

impl UrgencyLevel {
    /// Map a free-text classifier label onto an urgency level.
    ///
    /// Anything that is not recognizably high or medium is treated as low.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_uppercase();
        if label.contains("HIGH") || label.contains("CAO") || label.contains("NGUY HIỂM") {
            UrgencyLevel::High
        } else if label.contains("MEDIUM") || label.contains("TRUNG BÌNH") {
            UrgencyLevel::Medium
        } else {
            UrgencyLevel::Low
        }
    }
}

/// Processing status of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    #[default]
    Pending,
    Reviewing,
    Resolved,
    Closed,
}

/// Classifier verdict attached to a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Whether the content describes an incident this service handles
    #[serde(rename = "isSchoolViolence", alias = "isIncident")]
    pub is_incident: bool,

    /// Why the content was turned away, when `is_incident` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<UrgencyLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,

    /// Confidence score, 0-100
    #[serde(
        rename = "confidenceScore",
        alias = "confidence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub confidence: Option<u8>,
}

/// An incident report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Device-assigned identifier, immutable once created
    pub id: String,

    /// Creation time (Unix millis)
    pub timestamp: u64,

    #[serde(rename = "type", default)]
    pub report_type: ReportType,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,

    #[serde(default)]
    pub status: ReportStatus,

    #[serde(
        rename = "aiAnalysis",
        alias = "analysis",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub analysis: Option<Analysis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default)]
    pub is_anonymous: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,

    /// Staff member who last changed the status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,

    /// When the status was last changed (Unix millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<u64>,
}

impl Report {
    /// Urgency assigned by the classifier, if the report was classified.
    pub fn urgency(&self) -> Option<UrgencyLevel> {
        self.analysis.as_ref().and_then(|a| a.urgency)
    }

    /// A report that staff must hear about right away.
    pub fn is_urgent_pending(&self) -> bool {
        self.urgency() == Some(UrgencyLevel::High) && self.status == ReportStatus::Pending
    }

    /// Return a copy with a new status, stamped with who changed it and when.
    pub fn with_status(&self, status: ReportStatus, processed_by: &str, now: u64) -> Report {
        Report {
            status,
            processed_by: Some(processed_by.to_string()),
            processed_at: Some(now),
            ..self.clone()
        }
    }
}

/// Who filed a report. Anonymous filings carry no identity fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reporter {
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub student_class: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
}

impl Reporter {
    pub fn anonymous() -> Self {
        Self {
            is_anonymous: true,
            ..Default::default()
        }
    }
}

/// Media attached to a draft, before it is uploaded or inlined
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// A report as entered by the user, before it has an identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDraft {
    pub report_type: ReportType,
    pub content: String,
    pub media: Option<MediaAttachment>,
    pub location: Option<String>,
    pub reporter: Reporter,
    /// Verdict computed by the caller; the pipeline classifies when absent
    pub analysis: Option<Analysis>,
}

/// Device position attached to an SOS report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    /// Radius of uncertainty in meters
    #[serde(default)]
    pub accuracy: f64,
}

impl GeoPoint {
    pub fn maps_link(&self) -> String {
        format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            self.lat, self.lng
        )
    }
}

/// Alert-relevant view of a counseling chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselingSession {
    pub id: String,

    #[serde(default)]
    pub student_name: String,

    #[serde(default)]
    pub student_class: String,

    /// Session start (Unix millis)
    #[serde(default)]
    pub start_time: u64,

    /// Last message or risk re-evaluation (Unix millis)
    pub last_activity: u64,

    pub risk_level: UrgencyLevel,

    /// Set when the classifier detects danger in the conversation
    pub is_flagged: bool,

    #[serde(default)]
    pub summary: String,
}

/// Current time in Unix millis.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Build a fresh report identifier from a timestamp and a random suffix.
pub fn generate_report_id(prefix: &str, now: u64) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}-{}-{:06}", prefix, now, suffix)
}

/// Sort newest first. Ties keep a stable order by identifier.
pub fn sort_newest_first(reports: &mut [Report]) {
    reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, timestamp: u64) -> Report {
        Report {
            id: id.to_string(),
            timestamp,
            report_type: ReportType::Text,
            content: "test".into(),
            media_url: None,
            media_mime_type: None,
            status: ReportStatus::Pending,
            analysis: None,
            location: None,
            is_anonymous: true,
            student_name: None,
            student_class: None,
            national_id: None,
            processed_by: None,
            processed_at: None,
        }
    }

    #[test]
    fn test_report_id_format() {
        let id = generate_report_id(REPORT_PREFIX, 1_700_000_000_000);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "RPT");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn test_urgency_from_label() {
        assert_eq!(UrgencyLevel::from_label("high"), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::from_label("Mức CAO"), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::from_label("medium risk"), UrgencyLevel::Medium);
        assert_eq!(UrgencyLevel::from_label("unclear"), UrgencyLevel::Low);
    }

    #[test]
    fn test_with_status_keeps_identity() {
        let original = report("RPT-1-000001", 10);
        let updated = original.with_status(ReportStatus::Reviewing, "staff", 99);
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.timestamp, original.timestamp);
        assert_eq!(updated.status, ReportStatus::Reviewing);
        assert_eq!(updated.processed_by.as_deref(), Some("staff"));
        assert_eq!(updated.processed_at, Some(99));
    }

    #[test]
    fn test_sort_newest_first() {
        let mut reports = vec![report("a", 1), report("c", 3), report("b", 2)];
        sort_newest_first(&mut reports);
        let ids: Vec<&str> = reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_report_wire_format() {
        let mut r = report("RPT-5-000000", 5);
        r.analysis = Some(Analysis {
            is_incident: true,
            rejection_reason: None,
            urgency: Some(UrgencyLevel::High),
            summary: None,
            category: vec![],
            confidence: None,
        });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "TEXT");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["isAnonymous"], true);
        assert_eq!(json["aiAnalysis"]["urgency"], "HIGH");
        assert_eq!(json["aiAnalysis"]["isSchoolViolence"], true);
        assert!(json.get("analysis").is_none());
        assert!(r.is_urgent_pending());
    }

    #[test]
    fn test_store_document_layout_parses() {
        let doc = r#"{
            "id": "RPT-1700000000000-123456",
            "timestamp": 1700000000000,
            "type": "IMAGE",
            "content": "Fight behind the gym",
            "mediaUrl": "https://media.example.org/a.jpg",
            "status": "PENDING",
            "aiAnalysis": {
                "isSchoolViolence": true,
                "urgency": "HIGH",
                "summary": "Physical fight",
                "category": ["Physical"],
                "confidenceScore": 92
            },
            "isAnonymous": false,
            "studentName": "Student A",
            "studentClass": "10A1"
        }"#;
        let r: Report = serde_json::from_str(doc).unwrap();
        let analysis = r.analysis.as_ref().unwrap();
        assert!(analysis.is_incident);
        assert_eq!(analysis.confidence, Some(92));
        assert_eq!(analysis.category, vec!["Physical".to_string()]);
        assert_eq!(r.report_type, ReportType::Image);
        assert!(r.is_urgent_pending());
    }
}
