use super::{consumer_ref, TestEnv, ROW_DATA_WEIGHT};
use crate::client::memory::FailPoint;
use crate::client::object_store::ObjectStore;
use crate::client::storage::{StorageClient, TableSchema};
use crate::queue::builder::SnapshotBuilder;
use crate::queue::error::QueueError;
use crate::queue::types::{ObjectKind, QueueFamily, QueueRef, QueueTableRow, TabletState};
use std::time::Duration;

#[tokio::test]
async fn test_snapshot_counters_and_data_weights() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[10, 3]);
    env.consumer(&row.queue_ref, &consumer_ref("hume", "c"), true, &[0, 0]);

    let snapshot = env.snapshot(&row, None).await;

    assert!(snapshot.is_ok(), "{:?}", snapshot.error);
    assert_eq!(snapshot.pass_index, 1);
    assert_eq!(snapshot.family, QueueFamily::OrderedDynamicTable);
    assert_eq!(snapshot.partition_count, 2);
    assert!(snapshot.has_timestamp_column);
    assert!(snapshot.has_cumulative_data_weight_column);
    assert_eq!(snapshot.registrations.len(), 1);

    let first = &snapshot.partition_snapshots[0];
    assert_eq!(first.lower_row_index, 0);
    assert_eq!(first.upper_row_index, 10);
    assert_eq!(first.available_row_count, 10);
    assert_eq!(first.trimmed_data_weight, Some(ROW_DATA_WEIGHT));
    assert_eq!(first.cumulative_data_weight, Some(10 * ROW_DATA_WEIGHT));
    assert_eq!(first.available_data_weight, Some(9 * ROW_DATA_WEIGHT));
    assert!(first.last_row_commit_time.is_some());
    assert_eq!(
        first.meta.as_ref().and_then(|meta| meta.host.as_deref()),
        Some("hume-node-0")
    );

    let second = &snapshot.partition_snapshots[1];
    assert_eq!(second.upper_row_index, 3);
    assert_eq!(second.cumulative_data_weight, Some(3 * ROW_DATA_WEIGHT));
}

#[tokio::test]
async fn test_empty_partition_has_no_data_weights() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[0]);

    let snapshot = env.snapshot(&row, None).await;

    assert!(snapshot.is_ok());
    let partition = &snapshot.partition_snapshots[0];
    assert_eq!(partition.available_row_count, 0);
    assert_eq!(partition.cumulative_data_weight, None);
    assert_eq!(partition.last_row_commit_time, None);
}

#[tokio::test]
async fn test_trimmed_rows_move_lower_row_index() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[10]);
    env.cluster("hume").trim_table("//queues/a", 0, 4).await.unwrap();

    let snapshot = env.snapshot(&row, None).await;
    let partition = &snapshot.partition_snapshots[0];
    assert_eq!(partition.lower_row_index, 4);
    assert_eq!(partition.available_row_count, 6);
    assert_eq!(partition.trimmed_data_weight, Some(5 * ROW_DATA_WEIGHT));
    assert_eq!(partition.available_data_weight, Some(5 * ROW_DATA_WEIGHT));
}

#[tokio::test]
async fn test_unmounted_tablet_is_partition_error() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[5, 5, 5]);
    let cluster = env.cluster("hume");
    cluster.set_tablet_state("//queues/a", 1, TabletState::Unmounted);
    cluster.set_tablet_state("//queues/a", 2, TabletState::Frozen);

    let snapshot = env.snapshot(&row, None).await;

    assert!(snapshot.is_ok());
    assert!(matches!(
        snapshot.partition_snapshots[1].error,
        Some(QueueError::TabletNotMounted {
            state: TabletState::Unmounted,
            ..
        })
    ));
    assert!(snapshot.partition_snapshots[0].is_ok());
    assert!(snapshot.partition_snapshots[2].is_ok());
    assert_eq!(snapshot.partition_snapshots[2].upper_row_index, 5);
}

#[tokio::test]
async fn test_missing_table_is_queue_error() {
    let env = TestEnv::new(&["hume"]);
    let row = QueueTableRow::ordered_table(QueueRef::new("hume", "//queues/absent"), "0-0-0-0");

    let snapshot = env.snapshot(&row, None).await;

    assert_eq!(snapshot.pass_index, 1);
    assert!(matches!(
        snapshot.error,
        Some(QueueError::TableNotFound { .. })
    ));
}

#[tokio::test]
async fn test_sorted_table_rejected() {
    let env = TestEnv::new(&["hume"]);
    let mut schema = TableSchema::ordered(&["key", "value"]);
    schema.sorted = true;
    env.cluster("hume")
        .create_table("//queues/sorted", "2-2-2-2", 1, Some(schema));
    let row = QueueTableRow::ordered_table(QueueRef::new("hume", "//queues/sorted"), "2-2-2-2");

    let snapshot = env.snapshot(&row, None).await;

    assert!(matches!(
        snapshot.error,
        Some(QueueError::InvalidSchema { .. })
    ));
}

#[tokio::test]
async fn test_failed_data_weight_probe_fails_snapshot() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[4]);
    env.cluster("hume").fail(FailPoint::CumulativeDataWeights);

    let snapshot = env.snapshot(&row, None).await;

    let error = snapshot.error.as_ref().unwrap();
    assert!(error
        .to_string()
        .contains("Failed to collect cumulative data weights"));
    // Counters read before the failure are kept
    assert_eq!(snapshot.partition_snapshots[0].upper_row_index, 4);
}

#[tokio::test]
async fn test_unknown_cluster_is_queue_error() {
    let env = TestEnv::new(&["hume"]);
    let row = QueueTableRow::ordered_table(QueueRef::new("arnold", "//queues/a"), "1-1-1-1");

    let snapshot = env.snapshot(&row, None).await;

    assert!(matches!(
        snapshot.error,
        Some(QueueError::UnknownCluster { .. })
    ));
}

#[tokio::test]
async fn test_write_rate_carried_over_from_previous_snapshot() {
    let env = TestEnv::new(&["hume"]);
    let row = env.create_queue("hume", "//queues/a", "1-1-1-1", &[5]);
    let first = env.snapshot(&row, None).await;
    assert_eq!(first.partition_snapshots[0].write_rate.row_count.immediate_rate(), 0.0);

    env.clock.advance_time(Duration::from_secs(10));
    env.append("hume", "//queues/a", &[100]);
    let registrations = env.store.get_registrations(&row.queue_ref, ObjectKind::Queue);
    let second = SnapshotBuilder::new(
        env.directory.as_ref(),
        env.clock.as_ref(),
        &first,
        row.clone(),
        None,
        registrations,
    )
    .build()
    .await;

    assert!(second.is_ok(), "{:?}", second.error);
    assert_eq!(second.pass_index, 2);
    let rate = &second.partition_snapshots[0].write_rate;
    assert_eq!(rate.row_count.immediate_rate(), 10.0);
    assert_eq!(rate.row_count.window_rates()[0], 10.0);
    assert_eq!(rate.data_weight.immediate_rate(), 10.0 * ROW_DATA_WEIGHT as f64);
    assert_eq!(second.write_rate.row_count.immediate_rate(), 10.0);

    // Without a previous observation there is nothing to compute a rate from
    let fresh = env.snapshot(&row, None).await;
    assert_eq!(fresh.partition_snapshots[0].write_rate.row_count.immediate_rate(), 0.0);
}
