//! End-to-end tests for the lifecycle manager
//!
//! Each test runs a manager over a temporary base directory with a manual
//! clock. The reaper interval is long, so cycles are driven explicitly unless
//! a test shortens it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use depositor_core::configuration::{CONFIGURATION_FILE_NAME, PROPERTY_USER_HANDLE};
use depositor_core::{Configuration, DepositError, LifecycleState, ReapOutcome, UnitStatus};
use std::time::Duration;

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_creates_directory_with_configuration() {
    let harness = Harness::new();
    let manager = harness.start();

    let directory = manager.register(properties("cfg-1")).unwrap();
    assert!(directory.starts_with(harness.base_dir()));
    assert_eq!(file_names(&directory), vec![CONFIGURATION_FILE_NAME]);

    let status = manager.status("cfg-1").unwrap();
    assert_eq!(status.state, LifecycleState::Active);
    assert!(status.files.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_invalid_documents() {
    let harness = Harness::new();
    let manager = harness.start();

    manager.register(properties("cfg-1")).unwrap();
    let err = manager.register(properties("cfg-1")).unwrap_err();
    assert!(matches!(err, DepositError::AlreadyExists(_)));

    let mut incomplete = properties("cfg-2");
    incomplete.remove(PROPERTY_USER_HANDLE);
    incomplete.insert("InfrastructureEndpoint".into(), "not a url".into());
    match manager.register(incomplete).unwrap_err() {
        DepositError::ValidationFailed { issues } => assert_eq!(issues.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.status("cfg-2").is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_register_xml_document() {
    let harness = Harness::new();
    let manager = harness.start();

    let xml = depositor_core::properties::render(&properties("cfg-xml")).unwrap();
    manager.register_xml(&xml).unwrap();
    assert_eq!(
        manager.status("cfg-xml").unwrap().state,
        LifecycleState::Active
    );

    let err = manager.register_xml("<properties><entry key=\"a\">").unwrap_err();
    assert!(matches!(err, DepositError::ValidationFailed { .. }));

    manager.shutdown().await;
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn test_submitted_file_is_stored_and_marked_successful() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    assert_eq!(
        file_names(&directory),
        vec![CONFIGURATION_FILE_NAME, "successful_a.txt"]
    );
    wait_until(|| manager.outstanding_units() == 0).await;
    assert_eq!(harness.service.store_count("a.txt"), 1);

    // First submission starts the monitoring window on disk.
    let xml = std::fs::read_to_string(directory.join(CONFIGURATION_FILE_NAME)).unwrap();
    let configuration = Configuration::from_xml(&xml).unwrap();
    assert_eq!(configuration.monitoring_start(), Some(start_time()));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_no_trace() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    let err = manager
        .submit("cfg-1", "a.txt", &sha256("other"), &mut "hello".as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, DepositError::ChecksumMismatch { .. }));

    assert_eq!(file_names(&directory), vec![CONFIGURATION_FILE_NAME]);
    let status = manager.status("cfg-1").unwrap();
    assert!(status.files.is_empty());
    assert!(status.failed_files.is_empty());
    assert_eq!(manager.outstanding_units(), 0);

    // The name is free for a correct submission.
    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_checksum_comparison_ignores_case() {
    let harness = Harness::new();
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    manager
        .submit(
            "cfg-1",
            "a.txt",
            &sha256("hello").to_uppercase(),
            &mut "hello".as_bytes(),
        )
        .await
        .unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_file_rejected_whatever_its_state() {
    let harness = Harness::new();
    harness.service.reject("bad.txt");
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "good.txt", "one").await.unwrap();
    submit(&manager, "cfg-1", "bad.txt", "two").await.unwrap();
    wait_for_status(&manager, "cfg-1", "good.txt", UnitStatus::Succeeded).await;
    wait_for_status(
        &manager,
        "cfg-1",
        "bad.txt",
        UnitStatus::Failed { retryable: false },
    )
    .await;

    for name in ["good.txt", "bad.txt"] {
        let err = submit(&manager, "cfg-1", name, "again").await.unwrap_err();
        assert!(
            matches!(err, DepositError::AlreadyExists(_)),
            "{name}: {err}"
        );
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_on_disk_is_rejected_after_restart() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();
    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;
    manager.shutdown().await;

    let manager = harness.start();
    let err = submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap_err();
    assert!(matches!(err, DepositError::AlreadyExists(_)));
    assert_eq!(
        file_names(&directory),
        vec![CONFIGURATION_FILE_NAME, "successful_a.txt"]
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_submissions_share_one_window_and_one_name() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    let (first, second, other) = tokio::join!(
        submit(&manager, "cfg-1", "a.txt", "one"),
        submit(&manager, "cfg-1", "a.txt", "two"),
        submit(&manager, "cfg-1", "b.txt", "three"),
    );
    other.unwrap();
    let same_name = [first, second];
    assert_eq!(same_name.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(same_name
        .iter()
        .any(|r| matches!(r, Err(DepositError::AlreadyExists(_)))));

    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;
    wait_for_status(&manager, "cfg-1", "b.txt", UnitStatus::Succeeded).await;
    assert_eq!(harness.service.store_count("a.txt"), 1);

    // A later submission keeps the first start.
    harness.clock.advance(chrono::Duration::minutes(5));
    submit(&manager, "cfg-1", "c.txt", "four").await.unwrap();
    let xml = std::fs::read_to_string(directory.join(CONFIGURATION_FILE_NAME)).unwrap();
    let configuration = Configuration::from_xml(&xml).unwrap();
    assert_eq!(configuration.monitoring_start(), Some(start_time()));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_submissions() {
    let harness = Harness::new();
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    let err = submit(&manager, "missing", "a.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::NotFound(_)));

    for name in ["../escape.txt", "successful_a.txt", "failed_a.txt", CONFIGURATION_FILE_NAME, ""] {
        let err = submit(&manager, "cfg-1", name, "x").await.unwrap_err();
        assert!(
            matches!(err, DepositError::ValidationFailed { .. }),
            "{name:?}: {err}"
        );
    }
    assert_eq!(manager.outstanding_units(), 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_capacity_limit_rejects_new_submissions() {
    let harness = Harness::new();
    harness.service.close_gate();
    let manager = harness.start_with(harness.config().with_max_units(1));
    manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "one").await.unwrap();
    assert_eq!(manager.outstanding_units(), 1);

    let err = submit(&manager, "cfg-1", "b.txt", "two").await.unwrap_err();
    assert!(matches!(err, DepositError::CapacityExceeded { limit: 1 }));
    assert!(err.is_retryable());

    harness.service.open_gate();
    wait_until(|| manager.outstanding_units() == 0).await;

    submit(&manager, "cfg-1", "b.txt", "two").await.unwrap();
    wait_for_status(&manager, "cfg-1", "b.txt", UnitStatus::Succeeded).await;

    manager.shutdown().await;
}

// ============================================================================
// Failure and retry
// ============================================================================

#[tokio::test]
async fn test_failed_file_is_retried_until_stored() {
    let harness = Harness::new();
    harness.service.fail_times("a.txt", 2);
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Failed { retryable: true }).await;

    let status = manager.status("cfg-1").unwrap();
    assert_eq!(status.state, LifecycleState::Failing);
    assert_eq!(status.failed_files, vec!["a.txt"]);
    assert_eq!(
        file_names(&directory),
        vec![CONFIGURATION_FILE_NAME, "failed_a.txt"]
    );

    manager.run_reaper_cycle().await;
    wait_until(|| {
        let status = manager.status("cfg-1").unwrap();
        status.files[0].attempts == 2
            && status.files[0].status == UnitStatus::Failed { retryable: true }
    })
    .await;

    manager.run_reaper_cycle().await;
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    let status = manager.status("cfg-1").unwrap();
    assert_eq!(status.state, LifecycleState::Active);
    assert!(status.failed_files.is_empty());
    assert_eq!(status.files[0].attempts, 3);
    assert_eq!(
        file_names(&directory),
        vec![CONFIGURATION_FILE_NAME, "successful_a.txt"]
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_non_retryable_failure_is_not_retried() {
    let harness = Harness::new();
    harness.service.reject("bad.txt");
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "bad.txt", "x").await.unwrap();
    wait_for_status(&manager, "cfg-1", "bad.txt", UnitStatus::Failed { retryable: false }).await;

    manager.run_reaper_cycle().await;
    manager.run_reaper_cycle().await;
    assert_eq!(harness.service.store_count("bad.txt"), 1);
    assert_eq!(
        manager.status("cfg-1").unwrap().state,
        LifecycleState::Failing
    );

    manager.shutdown().await;
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_clean_configuration_is_removed_on_expiry() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    // Window still open: nothing happens.
    manager.run_reaper_cycle().await;
    assert!(directory.exists());

    harness.expire();
    manager.run_reaper_cycle().await;

    assert!(!directory.exists());
    assert_eq!(
        manager.status("cfg-1").unwrap().state,
        LifecycleState::ExpiredSuccessful
    );

    let err = submit(&manager, "cfg-1", "b.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));
    let err = manager.delete("cfg-1").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_submission_after_window_is_expired_before_reaping() {
    let harness = Harness::new();
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    harness.expire();
    let err = submit(&manager, "cfg-1", "b.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));
    assert!(file_status(&manager, "cfg-1", "b.txt").is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_configuration_with_failures_is_preserved_on_expiry() {
    let harness = Harness::new();
    harness.service.reject("bad.txt");
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();
    let original = directory.file_name().unwrap().to_string_lossy().into_owned();

    submit(&manager, "cfg-1", "good.txt", "one").await.unwrap();
    submit(&manager, "cfg-1", "bad.txt", "two").await.unwrap();
    wait_for_status(&manager, "cfg-1", "good.txt", UnitStatus::Succeeded).await;
    wait_for_status(&manager, "cfg-1", "bad.txt", UnitStatus::Failed { retryable: false }).await;

    harness.expire();
    manager.run_reaper_cycle().await;

    let preserved = format!("failed_expired_{original}");
    assert_eq!(dir_names(&harness.base_dir()), vec![preserved.clone()]);
    assert_eq!(
        file_names(&harness.base_dir().join(&preserved)),
        vec![CONFIGURATION_FILE_NAME, "failed_bad.txt"]
    );

    let status = manager.status("cfg-1").unwrap();
    assert_eq!(status.state, LifecycleState::ExpiredFailed);
    assert!(status.directory.ends_with(&preserved));

    let err = submit(&manager, "cfg-1", "c.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::PermanentlyFailed(_)));
    let err = manager.delete("cfg-1").await.unwrap_err();
    assert!(matches!(err, DepositError::PermanentlyFailed(_)));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_stuck_reap_does_not_stall_other_configurations() {
    let harness = Harness::new();
    harness.service.hold("a.txt");
    harness.service.fail_times("b.txt", 3);
    // Background reaper every second
    let manager = harness.start_with(harness.config().with_ping_interval_secs(2));
    let stuck = manager.register(properties("cfg-a")).unwrap();
    manager.register(properties("cfg-b")).unwrap();

    submit(&manager, "cfg-a", "a.txt", "alpha").await.unwrap();
    harness.expire();
    // cfg-b's window starts now, so only cfg-a is expired
    submit(&manager, "cfg-b", "b.txt", "beta").await.unwrap();

    wait_until(|| manager.status("cfg-a").unwrap().state == LifecycleState::Reaping).await;
    wait_for_status(&manager, "cfg-b", "b.txt", UnitStatus::Succeeded).await;

    assert_eq!(manager.status("cfg-a").unwrap().state, LifecycleState::Reaping);
    assert!(stuck.join("a.txt").exists());
    assert_eq!(harness.service.store_count("b.txt"), 4);

    harness.service.release("a.txt");
    wait_until(|| {
        manager.status("cfg-a").unwrap().state == LifecycleState::ExpiredSuccessful
    })
    .await;
    assert!(!stuck.exists());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_reap_in_flight() {
    let harness = Harness::new();
    harness.service.close_gate();
    let manager = harness.start_with(harness.config().with_ping_interval_secs(2));
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    harness.expire();
    wait_until(|| manager.status("cfg-1").unwrap().state == LifecycleState::Reaping).await;

    let stopping = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());

    harness.service.open_gate();
    stopping.await.unwrap();
    assert!(!directory.exists());
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_reaps_immediately() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;

    assert_eq!(manager.delete("cfg-1").await.unwrap(), ReapOutcome::Removed);
    assert!(!directory.exists());

    let err = submit(&manager, "cfg-1", "b.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));
    let err = manager.delete("cfg-1").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));
    let err = manager.delete("unknown").await.unwrap_err();
    assert!(matches!(err, DepositError::NotFound(_)));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_delete_waits_for_running_units() {
    let harness = Harness::new();
    harness.service.close_gate();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();

    let deleting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.delete("cfg-1").await })
    };

    wait_until(|| manager.status("cfg-1").unwrap().state == LifecycleState::Reaping).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!deleting.is_finished());
    assert!(directory.join("a.txt").exists());

    let err = submit(&manager, "cfg-1", "b.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));

    harness.service.open_gate();
    assert_eq!(deleting.await.unwrap().unwrap(), ReapOutcome::Removed);
    assert!(!directory.exists());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_delete_waits_for_reap_started_by_reaper() {
    let harness = Harness::new();
    harness.service.close_gate();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    harness.expire();

    let cycle = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run_reaper_cycle().await })
    };
    wait_until(|| manager.status("cfg-1").unwrap().state == LifecycleState::Reaping).await;

    let deleting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.delete("cfg-1").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!deleting.is_finished());
    assert!(directory.join("a.txt").exists());

    harness.service.open_gate();
    assert_eq!(deleting.await.unwrap().unwrap(), ReapOutcome::Removed);
    cycle.await.unwrap();
    assert!(!directory.exists());
    assert_eq!(
        manager.status("cfg-1").unwrap().state,
        LifecycleState::ExpiredSuccessful
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_delete_during_reaper_reap_reports_failed_configuration() {
    let harness = Harness::new();
    harness.service.reject("a.txt");
    harness.service.close_gate();
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    harness.expire();

    let cycle = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run_reaper_cycle().await })
    };
    wait_until(|| manager.status("cfg-1").unwrap().state == LifecycleState::Reaping).await;

    let deleting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.delete("cfg-1").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!deleting.is_finished());

    harness.service.open_gate();
    let err = deleting.await.unwrap().unwrap_err();
    assert!(matches!(err, DepositError::PermanentlyFailed(_)));
    cycle.await.unwrap();

    let status = manager.status("cfg-1").unwrap();
    assert_eq!(status.state, LifecycleState::ExpiredFailed);
    assert_eq!(status.failed_files, vec!["a.txt".to_string()]);
    let dirs = dir_names(&harness.base_dir());
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].starts_with("failed_expired_"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_delete_preserves_failed_configuration() {
    let harness = Harness::new();
    harness.service.fail_times("a.txt", u32::MAX);
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();

    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Failed { retryable: true }).await;

    assert_eq!(
        manager.delete("cfg-1").await.unwrap(),
        ReapOutcome::PreservedAsFailed
    );
    let dirs = dir_names(&harness.base_dir());
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].starts_with("failed_expired_"));

    manager.shutdown().await;
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_restart_reattempts_pending_and_failed_files() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();
    manager.shutdown().await;

    std::fs::write(directory.join("b.txt"), "left pending").unwrap();
    std::fs::write(directory.join("failed_c.txt"), "left failed").unwrap();
    std::fs::write(directory.join("successful_d.txt"), "done").unwrap();

    let manager = harness.start();
    wait_for_status(&manager, "cfg-1", "b.txt", UnitStatus::Succeeded).await;
    wait_for_status(&manager, "cfg-1", "c.txt", UnitStatus::Succeeded).await;

    assert_eq!(
        file_names(&directory),
        vec![
            CONFIGURATION_FILE_NAME,
            "successful_b.txt",
            "successful_c.txt",
            "successful_d.txt",
        ]
    );
    assert_eq!(harness.service.store_count("d.txt"), 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_restart_after_window_closed_reaps_configuration() {
    let harness = Harness::new();
    let manager = harness.start();
    let directory = manager.register(properties("cfg-1")).unwrap();
    submit(&manager, "cfg-1", "a.txt", "hello").await.unwrap();
    wait_for_status(&manager, "cfg-1", "a.txt", UnitStatus::Succeeded).await;
    manager.shutdown().await;

    harness.expire();
    let manager = harness.start();

    let err = submit(&manager, "cfg-1", "b.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::Expired(_)));

    manager.run_reaper_cycle().await;
    wait_until(|| {
        manager.status("cfg-1").unwrap().state == LifecycleState::ExpiredSuccessful
    })
    .await;
    assert!(!directory.exists());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_restart_keeps_failed_expired_configuration_closed() {
    let harness = Harness::new();
    harness.service.reject("bad.txt");
    let manager = harness.start();
    manager.register(properties("cfg-1")).unwrap();
    submit(&manager, "cfg-1", "bad.txt", "x").await.unwrap();
    wait_for_status(&manager, "cfg-1", "bad.txt", UnitStatus::Failed { retryable: false }).await;
    harness.expire();
    manager.run_reaper_cycle().await;
    manager.shutdown().await;

    let manager = harness.start();
    assert_eq!(
        manager.status("cfg-1").unwrap().state,
        LifecycleState::ExpiredFailed
    );

    let err = submit(&manager, "cfg-1", "c.txt", "x").await.unwrap_err();
    assert!(matches!(err, DepositError::PermanentlyFailed(_)));
    let err = manager.register(properties("cfg-1")).unwrap_err();
    assert!(matches!(err, DepositError::AlreadyExists(_)));
    assert_eq!(harness.service.store_count("bad.txt"), 1);

    manager.shutdown().await;
}
