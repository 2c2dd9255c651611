use super::{consumer_ref, with_auto_trim, TestEnv};
use crate::client::memory::FailPoint;
use crate::client::storage::StorageClient;
use crate::queue::error::{ErrorScope, QueueError};
use crate::queue::snapshot::{ConsumerPartitionSnapshot, ConsumerSnapshot, SubConsumerSnapshot};
use crate::queue::trim::report::TrimReport;
use crate::queue::trim::run_trimming_iteration;
use crate::queue::types::{QueueTableRow, TabletState};
use std::time::Duration;

const TAG: &str = "Queue: hume://queues/a, Leading: true";

async fn trim(env: &TestEnv, row: &QueueTableRow) -> TrimReport {
    let snapshot = env.snapshot(row, None).await;
    run_trimming_iteration(snapshot, env.directory.as_ref(), env.store.as_ref(), TAG).await
}

fn queue(env: &TestEnv, rows: &[usize], retained_rows: Option<i64>) -> QueueTableRow {
    with_auto_trim(
        env.create_queue("hume", "//queues/a", "1-1-1-1", rows),
        retained_rows,
        None,
    )
}

fn trimmed(env: &TestEnv, tablet_index: usize) -> i64 {
    env.cluster("hume")
        .tablet_counters("//queues/a", tablet_index)
        .map(|(trimmed, _)| trimmed)
        .unwrap()
}

#[tokio::test]
async fn test_retained_rows_caps_vital_consumer_progress() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[500], Some(100));
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[450]);

    let report = trim(&env, &row).await;

    assert_eq!(report.error, None);
    assert!(report.timestamp.is_some());
    let replica = report.replica("hume://queues/a").unwrap();
    assert_eq!(replica.error, None);
    assert_eq!(replica.partitions[0].trimmed_row_count, Some(400));
    assert_eq!(trimmed(&env, 0), 400);
    assert_eq!(env.cluster("hume").trim_log()[0].path, "#1-1-1-1");
}

#[tokio::test]
async fn test_vital_consumer_floor_without_limits() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[100], None);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[50]);

    trim(&env, &row).await;

    assert_eq!(trimmed(&env, 0), 50);
}

#[tokio::test]
async fn test_slowest_vital_consumer_wins() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[100, 100], None);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "fast"), true, &[70, 90]);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "slow"), true, &[30, 95]);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "idle"), false, &[5, 5]);

    trim(&env, &row).await;

    assert_eq!(trimmed(&env, 0), 30);
    assert_eq!(trimmed(&env, 1), 90);
}

#[tokio::test]
async fn test_no_vital_consumers_issues_no_trim() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[100], Some(10));
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), false, &[80]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert!(replica.error.as_ref().unwrap().contains("no vital consumers"));
    assert!(env.cluster("hume").trim_log().is_empty());
}

#[tokio::test]
async fn test_disabled_auto_trim_skips_iteration() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[100]);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[80]);

    let report = trim(&env, &row).await;

    assert!(report.error.as_ref().unwrap().contains("disabled"));
    assert!(report.replicas.is_empty());
    assert!(env.cluster("hume").trim_log().is_empty());
}

#[tokio::test]
async fn test_never_trims_backwards() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[100], None);
    env.cluster("hume").trim_table("//queues/a", 0, 60).await.unwrap();
    env.cluster("hume").clear_trim_log();
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[40]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert_eq!(replica.partitions[0].error, None);
    assert_eq!(replica.partitions[0].trimmed_row_count, None);
    assert!(env.cluster("hume").trim_log().is_empty());
    assert_eq!(trimmed(&env, 0), 60);
}

#[tokio::test]
async fn test_not_mounted_partition_is_isolated() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20, 20, 20], None);
    env.cluster("hume")
        .set_tablet_state("//queues/a", 1, TabletState::Frozen);
    env.cluster("hume")
        .set_tablet_state("//queues/a", 2, TabletState::Unmounted);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10, 10, 10]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert_eq!(replica.partitions[0].trimmed_row_count, Some(10));
    assert!(replica.partitions[1]
        .error
        .as_ref()
        .unwrap()
        .contains("is not mounted"));
    assert!(replica.partitions[2].error.is_some());
    assert_eq!(trimmed(&env, 0), 10);
    assert_eq!(trimmed(&env, 1), 0);
    assert_eq!(trimmed(&env, 2), 0);
}

#[tokio::test]
async fn test_failed_trim_request_is_isolated() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20, 20], None);
    env.cluster("hume").fail_tablet(FailPoint::Trim, 0);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10, 15]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert!(replica.partitions[0]
        .error
        .as_ref()
        .unwrap()
        .contains("Error occurred while executing trimming request for partition 0"));
    assert_eq!(replica.partitions[1].trimmed_row_count, Some(15));
    assert_eq!(trimmed(&env, 0), 0);
    assert_eq!(trimmed(&env, 1), 15);
}

#[tokio::test]
async fn test_retained_lifetime_keeps_recent_rows() {
    let env = TestEnv::new(&["hume"]);
    let row = with_auto_trim(
        env.create_queue("hume", "//queues/a", "1-1-1-1", &[10]),
        None,
        Some(Duration::from_secs(3600)),
    );
    env.clock.advance_time(Duration::from_secs(2 * 3600));
    env.append("hume", "//queues/a", &[5]);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[15]);

    trim(&env, &row).await;

    assert_eq!(trimmed(&env, 0), 10);
}

#[tokio::test]
async fn test_failed_safe_trim_lookup_skips_replica() {
    let env = TestEnv::new(&["hume"]);
    let row = with_auto_trim(
        env.create_queue("hume", "//queues/a", "1-1-1-1", &[10]),
        None,
        Some(Duration::from_secs(60)),
    );
    env.cluster("hume").fail(FailPoint::SafeTrimRowCount);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert!(replica
        .error
        .as_ref()
        .unwrap()
        .contains("Unable to get safe trim row counts"));
    assert!(env.cluster("hume").trim_log().is_empty());
}

#[tokio::test]
async fn test_consumer_partition_error_blocks_partition() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20, 20], None);
    let consumer = consumer_ref("hume", "c");
    env.store.register(row.queue_ref.clone(), consumer.clone(), true);
    env.store.publish_consumer_snapshot(ConsumerSnapshot::new(consumer).with_sub_snapshot(
        row.queue_ref.clone(),
        SubConsumerSnapshot {
            partition_snapshots: vec![
                ConsumerPartitionSnapshot {
                    next_row_index: 10,
                    error: Some(QueueError::MissingData {
                        message: "offset row is unreadable".into(),
                    }),
                },
                ConsumerPartitionSnapshot {
                    next_row_index: 12,
                    error: None,
                },
            ],
        },
    ));

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert!(replica.partitions[0]
        .error
        .as_ref()
        .unwrap()
        .contains("offset row is unreadable"));
    assert_eq!(trimmed(&env, 0), 0);
    assert_eq!(trimmed(&env, 1), 12);
}

#[tokio::test]
async fn test_short_consumer_snapshot_blocks_missing_partition() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20, 20], None);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert_eq!(replica.partitions[0].trimmed_row_count, Some(10));
    assert!(replica.partitions[1]
        .error
        .as_ref()
        .unwrap()
        .contains("does not contain a snapshot for partition 1"));
}

#[tokio::test]
async fn test_missing_vital_consumer_snapshot_skips_replica() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20], None);
    let consumer = consumer_ref("hume", "c");
    env.consumer(&row.queue_ref, &consumer, true, &[10]);
    env.store.remove_snapshot(&consumer);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert!(replica
        .error
        .as_ref()
        .unwrap()
        .contains("missing registered vital consumer"));
    assert_eq!(replica.error_scope, Some(ErrorScope::Replica));
    assert!(env.cluster("hume").trim_log().is_empty());
}

#[tokio::test]
async fn test_erroneous_snapshot_skips_iteration() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20], None);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10]);
    env.cluster("hume").fail(FailPoint::TableMountInfo);

    let report = trim(&env, &row).await;

    assert!(report
        .error
        .as_ref()
        .unwrap()
        .contains("Trimming iteration skipped due to queue error"));
    assert!(env.cluster("hume").trim_log().is_empty());
}

#[tokio::test]
async fn test_timestamp_generation_failure_skips_iteration() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[20], None);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10]);
    let snapshot = env.snapshot(&row, None).await;
    env.cluster("hume").fail(FailPoint::GenerateTimestamp);

    let report =
        run_trimming_iteration(snapshot, env.directory.as_ref(), env.store.as_ref(), TAG).await;

    assert!(report
        .error
        .as_ref()
        .unwrap()
        .contains("Cannot generate timestamp"));
    assert_eq!(report.pass_index, 1);
}

#[tokio::test]
async fn test_negative_retained_rows_is_rejected() {
    for retained_rows in [-100, i64::MIN] {
        let env = TestEnv::new(&["hume"]);
        let row = queue(&env, &[500], Some(retained_rows));
        env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[450]);

        let report = trim(&env, &row).await;

        let replica = report.replica("hume://queues/a").unwrap();
        assert!(replica
            .error
            .as_ref()
            .unwrap()
            .contains("retained_rows must not be negative"));
        assert_eq!(replica.error_scope, Some(ErrorScope::Queue));
        assert!(env.cluster("hume").trim_log().is_empty());
    }
}

#[tokio::test]
async fn test_huge_retained_rows_blocks_trimming() {
    let env = TestEnv::new(&["hume"]);
    let row = queue(&env, &[500], Some(i64::MAX));
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[450]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert_eq!(replica.error, None);
    assert_eq!(replica.partitions[0].trimmed_row_count, None);
    assert_eq!(trimmed(&env, 0), 0);
}

#[tokio::test]
async fn test_failed_safe_trim_lookup_for_one_partition_is_isolated() {
    let env = TestEnv::new(&["hume"]);
    let row = with_auto_trim(
        env.create_queue("hume", "//queues/a", "1-1-1-1", &[10, 10]),
        None,
        Some(Duration::from_secs(60)),
    );
    env.clock.advance_time(Duration::from_secs(2 * 3600));
    env.cluster("hume").fail_tablet(FailPoint::SafeTrimRowCount, 0);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[10, 10]);

    let report = trim(&env, &row).await;

    let replica = report.replica("hume://queues/a").unwrap();
    assert_eq!(replica.error, None);
    assert!(replica.partitions[0]
        .error
        .as_ref()
        .unwrap()
        .contains("Error getting safe trim row count by timestamp"));
    assert_eq!(replica.partitions[0].trimmed_row_count, None);
    assert_eq!(replica.partitions[1].trimmed_row_count, Some(10));
    assert_eq!(trimmed(&env, 0), 0);
    assert_eq!(trimmed(&env, 1), 10);
}
