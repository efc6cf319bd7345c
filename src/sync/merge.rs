//! Snapshot reconciliation
//!
//! The merged view is recomputed from scratch on every snapshot: the remote
//! copy wins for every identifier it knows, and anything only the device has
//! is kept and queued for repair. Recomputing from the full inputs keeps the
//! result independent of delivery order.

use std::collections::HashSet;

use crate::model::{sort_newest_first, Report};

/// Result of merging one remote snapshot with local storage
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Snapshot plus local-only records, newest first
    pub merged: Vec<Report>,
    /// Records the remote store has not seen yet
    pub local_only: Vec<Report>,
}

/// Merge a remote snapshot with the full local report set.
pub fn merge_snapshot(local: Vec<Report>, snapshot: Vec<Report>) -> MergeOutcome {
    let remote_ids: HashSet<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
    let local_only: Vec<Report> = local
        .into_iter()
        .filter(|r| !remote_ids.contains(r.id.as_str()))
        .collect();

    let mut merged = snapshot;
    merged.extend(local_only.iter().cloned());
    sort_newest_first(&mut merged);

    MergeOutcome { merged, local_only }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReportStatus, ReportType};

    fn report(id: &str, timestamp: u64) -> Report {
        Report {
            id: id.to_string(),
            timestamp,
            report_type: ReportType::Text,
            content: String::new(),
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

    fn ids(reports: &[Report]) -> Vec<&str> {
        reports.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_local_only_records_are_kept() {
        let local = vec![report("a", 1), report("b", 5)];
        let snapshot = vec![report("a", 1), report("c", 3)];

        let outcome = merge_snapshot(local, snapshot);
        assert_eq!(ids(&outcome.merged), vec!["b", "c", "a"]);
        assert_eq!(ids(&outcome.local_only), vec!["b"]);
    }

    #[test]
    fn test_remote_copy_wins_for_known_ids() {
        let local = vec![report("a", 1)];
        let remote = report("a", 1).with_status(ReportStatus::Resolved, "staff", 9);

        let outcome = merge_snapshot(local, vec![remote]);
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged[0].status, ReportStatus::Resolved);
        assert!(outcome.local_only.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let local = vec![report("a", 1), report("b", 2), report("d", 4)];
        let snapshot = vec![report("c", 3), report("a", 1)];

        let first = merge_snapshot(local.clone(), snapshot.clone());
        let second = merge_snapshot(local, snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_snapshot_yields_local_view() {
        let outcome = merge_snapshot(vec![report("a", 1), report("b", 2)], vec![]);
        assert_eq!(ids(&outcome.merged), vec!["b", "a"]);
        assert_eq!(outcome.local_only.len(), 2);
    }
}
