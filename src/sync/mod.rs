//! Offline-first reconciliation with the shared document store
//!
//! Handles:
//! - Merging remote snapshots with on-device reports
//! - Background repair of records the remote has not seen
//! - Reconnection on a fixed interval while offline
//! - The published report view and connection state

pub mod controller;
pub mod merge;
pub mod status;
pub mod view;

pub use controller::{SyncController, SyncOptions};
pub use merge::{merge_snapshot, MergeOutcome};
pub use status::{SyncState, SyncStatus};
pub use view::{ReportView, ViewWriter};
