//! Content classification seam
//!
//! The classifier itself is an external service. The pipeline only relies
//! on the verdict shape: whether the content is an incident at all, and how
//! urgent it is.

use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::model::{Analysis, ReportType};

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        content: &str,
        report_type: ReportType,
    ) -> Result<Analysis, ClassifierError>;
}

/// Verdict used for emergency reports, which skip classification.
pub fn sos_analysis() -> Analysis {
    Analysis {
        is_incident: true,
        rejection_reason: None,
        urgency: Some(crate::model::UrgencyLevel::High),
        summary: Some("SOS: immediate assistance requested".to_string()),
        category: vec!["EMERGENCY".to_string(), "DANGER TO LIFE".to_string()],
        confidence: Some(100),
    }
}
