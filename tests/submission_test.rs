//! Submission pipeline integration tests
//!
//! Covers throttling and durability at the pipeline boundary:
//! - Burst rejection before anything is written
//! - Ban persistence across restarts
//! - Capacity failures aborting the submission

use std::sync::Arc;
use std::time::Duration;

use safespeak_node::alert::{AlertDetector, MonitoringHandle};
use safespeak_node::model::{Analysis, ReportDraft, Reporter, UrgencyLevel};
use safespeak_node::rate_limit::{RateLimitPolicy, RateLimiter};
use safespeak_node::remote::{DisabledRemoteStore, MemoryRemoteStore, RemoteStore};
use safespeak_node::storage::{LocalStore, RateLimitStore, SqliteStore};
use safespeak_node::sync::{ReportView, SyncController, SyncOptions};
use safespeak_node::{StorageError, SubmissionPipeline, SubmitError, Throttled};
use tempfile::TempDir;

const MINUTE: u64 = 60 * 1000;

fn build(
    local: Arc<SqliteStore>,
    remote: Arc<dyn RemoteStore>,
) -> (SubmissionPipeline, Arc<SyncController>, Arc<AlertDetector>) {
    let detector = Arc::new(AlertDetector::new(MonitoringHandle::new()));
    let controller = Arc::new(SyncController::new(
        local.clone(),
        remote,
        Arc::new(ReportView::new()),
        detector.clone(),
        SyncOptions::default(),
    ));
    let limiter = Arc::new(RateLimiter::new(local, RateLimitPolicy::default()));
    let pipeline =
        SubmissionPipeline::new(limiter, controller.clone(), None, Duration::from_secs(45));
    (pipeline, controller, detector)
}

fn draft(content: &str) -> ReportDraft {
    ReportDraft {
        content: content.to_string(),
        reporter: Reporter::anonymous(),
        ..Default::default()
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_sixth_submission_rejected_before_local_write() {
    let dir = TempDir::new().unwrap();
    let local = Arc::new(SqliteStore::open(dir.path(), 100).unwrap());
    let (pipeline, _controller, _detector) = build(local.clone(), Arc::new(DisabledRemoteStore));

    for i in 0..5 {
        pipeline
            .submit(draft(&format!("report number {}", i)))
            .await
            .unwrap();
    }

    let err = pipeline.submit(draft("the sixth payload")).await.unwrap_err();
    match err {
        SubmitError::Throttled(t) => {
            assert!(t.newly_banned);
            assert_eq!(t.remaining_secs(), 60);
        }
        other => panic!("expected throttling, got {}", other),
    }

    let stored = local.get_all().await.unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|r| r.content != "the sixth payload"));
}

#[tokio::test]
async fn test_ban_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let local = Arc::new(SqliteStore::open(dir.path(), 100).unwrap());
        let (pipeline, _c, _d) = build(local, Arc::new(DisabledRemoteStore));
        for i in 0..6 {
            let _ = pipeline.submit(draft(&format!("r{}", i))).await;
        }
    }

    let local = Arc::new(SqliteStore::open(dir.path(), 100).unwrap());
    let (pipeline, _c, _d) = build(local, Arc::new(DisabledRemoteStore));
    assert!(matches!(
        pipeline.submit(draft("after restart")).await,
        Err(SubmitError::Throttled(Throttled {
            newly_banned: false,
            ..
        }))
    ));
}

#[tokio::test]
async fn test_window_policy_over_simulated_time() {
    let local = Arc::new(SqliteStore::open_in_memory(100).unwrap());
    let limiter = RateLimiter::new(local.clone(), RateLimitPolicy::default());
    let start = 1_700_000_000_000u64;

    for i in 0..5 {
        limiter.admit(start + i * MINUTE).await.unwrap();
    }
    assert!(limiter.admit(start + 5 * MINUTE).await.is_err());

    // Ban is over but the window is still full: banned again
    let after_ban = start + 6 * MINUTE + 1;
    assert!(matches!(
        limiter.admit(after_ban).await,
        Err(SubmitError::Throttled(Throttled {
            newly_banned: true,
            ..
        }))
    ));

    // Once old entries leave the window, submissions go through again
    let later = start + 15 * MINUTE;
    limiter.admit(later).await.unwrap();
    let state = local.load_rate_limit().await.unwrap();
    assert!(state.history.iter().all(|&t| later - t < 10 * MINUTE));
}

#[tokio::test]
async fn test_rejected_drafts_do_not_spend_slots() {
    let local = Arc::new(SqliteStore::open_in_memory(100).unwrap());
    let (pipeline, _c, _d) = build(local.clone(), Arc::new(DisabledRemoteStore));

    for i in 0..7 {
        let mut d = draft(&format!("what time is the exam {}", i));
        d.analysis = Some(Analysis {
            is_incident: false,
            rejection_reason: Some("not an incident".to_string()),
            urgency: None,
            summary: None,
            category: vec![],
            confidence: None,
        });
        assert!(matches!(
            pipeline.submit(d).await,
            Err(SubmitError::NotAnIncident { .. })
        ));
    }
    assert!(local.load_rate_limit().await.unwrap().history.is_empty());

    // The full allowance is still there
    for i in 0..5 {
        pipeline.submit(draft(&format!("real report {}", i))).await.unwrap();
    }
}

// =============================================================================
// Durability
// =============================================================================

#[tokio::test]
async fn test_failed_local_writes_do_not_spend_slots() {
    let local = Arc::new(SqliteStore::open_in_memory(0).unwrap());
    let (pipeline, _c, _d) = build(local.clone(), Arc::new(DisabledRemoteStore));

    for i in 0..3 {
        assert!(matches!(
            pipeline.submit(draft(&format!("unsaveable {}", i))).await,
            Err(SubmitError::Durability(_))
        ));
    }
    let state = local.load_rate_limit().await.unwrap();
    assert!(state.history.is_empty());
    assert_eq!(state.ban_until, 0);
}

#[tokio::test]
async fn test_capacity_failure_aborts_without_alert() {
    let local = Arc::new(SqliteStore::open_in_memory(0).unwrap());
    let remote = MemoryRemoteStore::new();
    let (pipeline, controller, detector) = build(local, Arc::new(remote.clone()));

    let mut d = draft("urgent but unsaveable");
    d.analysis = Some(Analysis {
        is_incident: true,
        rejection_reason: None,
        urgency: Some(UrgencyLevel::High),
        summary: None,
        category: vec![],
        confidence: None,
    });

    let err = pipeline.submit(d).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Durability(StorageError::CapacityExceeded { limit: 0 })
    ));
    assert!(controller.view().is_empty());
    assert!(!detector.has_unread());
    assert_eq!(detector.watermark(), 0);
    assert!(remote.write_log().is_empty());
}
