//! Behavioural suites for the queue agent
//!
//! Every suite runs against the in-memory cluster with a manually advanced
//! clock, so commit timestamps and lifetimes are deterministic.

mod builder;
mod trimming;

use crate::client::memory::{MemoryClientDirectory, MemoryCluster, MemoryObjectStore};
use crate::client::object_store::ObjectStore;
use crate::client::storage::{TableSchema, CUMULATIVE_DATA_WEIGHT_COLUMN_NAME, TIMESTAMP_COLUMN_NAME};
use crate::core::time::MockTimeProvider;
use crate::queue::builder::SnapshotBuilder;
use crate::queue::controller::ControllerContext;
use crate::queue::error::QueueError;
use crate::queue::snapshot::{ConsumerSnapshot, QueueSnapshot, SubConsumerSnapshot};
use crate::queue::types::{
    AutoTrimConfig, ObjectKind, QueueRef, QueueTableRow, ReplicatedTableMappingRow,
};
use std::sync::Arc;
use std::time::Duration;

pub(super) const ROW_DATA_WEIGHT: i64 = 10;

pub(super) struct TestEnv {
    pub clock: Arc<MockTimeProvider>,
    pub directory: Arc<MemoryClientDirectory>,
    pub store: Arc<MemoryObjectStore>,
}

impl TestEnv {
    pub fn new(clusters: &[&str]) -> Self {
        let clock = Arc::new(MockTimeProvider::new());
        let directory = Arc::new(MemoryClientDirectory::new());
        for name in clusters {
            let cluster = MemoryCluster::new(*name, clock.clone());
            for index in 0..4 {
                cluster.add_cell(&format!("cell-{}", index), &format!("{}-node-{}", name, index));
            }
            directory.register(Arc::new(cluster));
        }
        Self {
            clock,
            directory,
            store: Arc::new(MemoryObjectStore::new()),
        }
    }

    pub fn cluster(&self, name: &str) -> Arc<MemoryCluster> {
        self.directory.cluster(name).unwrap()
    }

    /// Ordered table with one tablet per entry of `rows`, filled now
    pub fn create_queue(
        &self,
        cluster: &str,
        path: &str,
        object_id: &str,
        rows: &[usize],
    ) -> QueueTableRow {
        let storage = self.cluster(cluster);
        storage.create_table(
            path,
            object_id,
            rows.len(),
            Some(TableSchema::ordered(&[
                "data",
                TIMESTAMP_COLUMN_NAME,
                CUMULATIVE_DATA_WEIGHT_COLUMN_NAME,
            ])),
        );
        self.append(cluster, path, rows);
        QueueTableRow::ordered_table(QueueRef::new(cluster, path), object_id)
    }

    pub fn append(&self, cluster: &str, path: &str, rows: &[usize]) {
        let storage = self.cluster(cluster);
        for (tablet_index, &count) in rows.iter().enumerate() {
            if count > 0 {
                storage
                    .append_rows(path, tablet_index, count, ROW_DATA_WEIGHT)
                    .unwrap();
            }
        }
    }

    /// Register `consumer` as a consumer of `queue` and publish its offsets
    pub fn consumer(&self, queue: &QueueRef, consumer: &QueueRef, vital: bool, offsets: &[i64]) {
        self.store.register(queue.clone(), consumer.clone(), vital);
        let snapshot = self
            .store
            .find_consumer_snapshot(consumer)
            .map(|existing| (*existing).clone())
            .unwrap_or_else(|| ConsumerSnapshot::new(consumer.clone()));
        self.store.publish_consumer_snapshot(
            snapshot.with_sub_snapshot(queue.clone(), SubConsumerSnapshot::from_offsets(offsets)),
        );
    }

    /// Snapshot built from scratch, as on a controller's first pass
    pub async fn snapshot(
        &self,
        row: &QueueTableRow,
        mapping: Option<&ReplicatedTableMappingRow>,
    ) -> Arc<QueueSnapshot> {
        let previous = QueueSnapshot::erroneous(
            row.clone(),
            mapping.cloned(),
            QueueError::NotProcessedYet,
        );
        let registrations = self
            .store
            .get_registrations(&row.queue_ref, ObjectKind::Queue);
        Arc::new(
            SnapshotBuilder::new(
                self.directory.as_ref(),
                self.clock.as_ref(),
                &previous,
                row.clone(),
                mapping.cloned(),
                registrations,
            )
            .build()
            .await,
        )
    }

    pub fn controller_context(&self) -> ControllerContext {
        ControllerContext {
            directory: self.directory.clone(),
            object_store: self.store.clone(),
            clock: self.clock.clone(),
            schedule_passes: false,
        }
    }
}

pub(super) fn with_auto_trim(
    mut row: QueueTableRow,
    retained_rows: Option<i64>,
    retained_lifetime_duration: Option<Duration>,
) -> QueueTableRow {
    row.auto_trim_config = AutoTrimConfig {
        enable: true,
        retained_rows,
        retained_lifetime_duration,
    };
    row
}

pub(super) fn consumer_ref(cluster: &str, name: &str) -> QueueRef {
    QueueRef::new(cluster, format!("//consumers/{}", name))
}
