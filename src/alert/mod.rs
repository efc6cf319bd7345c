//! Urgent-event alerting for staff
//!
//! Handles:
//! - Watermark de-duplication of qualifying events
//! - Monitoring exemptions for sessions open in front of staff
//! - Fan-out of alerts and the unread flag

pub mod detector;
pub mod monitor;
pub mod watermark;

pub use detector::{Alert, AlertDetector, AlertItem, AlertKind};
pub use monitor::{MonitorGuard, MonitoringHandle};
pub use watermark::AlertWatermark;
