//! safespeak-node: offline-first incident reporting runtime
//!
//! Runs on a school device and provides:
//! - Durable on-device report storage that works without connectivity
//! - Reconciliation with the shared document store (merge, repair, reconnect)
//! - Per-device submission throttling
//! - De-duplicated urgent alerts for staff
//! - A staff-facing HTTP API

pub mod alert;
pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod node;
pub mod pipeline;
pub mod rate_limit;
pub mod remote;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{RemoteError, RemoteErrorKind, StorageError, SubmitError, Throttled};
pub use model::{CounselingSession, Report, ReportDraft, ReportStatus, UrgencyLevel};
pub use node::{Node, NodeHandle};
pub use pipeline::{Delivery, Submission, SubmissionPipeline};
pub use sync::{SyncController, SyncState, SyncStatus};
