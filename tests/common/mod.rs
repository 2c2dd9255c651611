//! Common test utilities and helpers
//!
//! Builds in-memory clusters and agents through the public API only.

use queue_agent::client::memory::{MemoryClientDirectory, MemoryCluster, MemoryObjectStore};
use queue_agent::client::storage::{
    TableSchema, CUMULATIVE_DATA_WEIGHT_COLUMN_NAME, TIMESTAMP_COLUMN_NAME,
};
use queue_agent::core::time::MockTimeProvider;
use queue_agent::queue::api::{
    AutoTrimConfig, ConsumerSnapshot, QueueAgent, QueueControllerDynamicConfig, QueueRef,
    QueueTableRow, SubConsumerSnapshot,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub clock: Arc<MockTimeProvider>,
    pub directory: Arc<MemoryClientDirectory>,
    pub store: Arc<MemoryObjectStore>,
}

impl Harness {
    pub fn new(clusters: &[&str]) -> Self {
        let clock = Arc::new(MockTimeProvider::new());
        let directory = Arc::new(MemoryClientDirectory::new());
        for name in clusters {
            directory.register(Arc::new(MemoryCluster::new(*name, clock.clone())));
        }
        Self {
            clock,
            directory,
            store: Arc::new(MemoryObjectStore::new()),
        }
    }

    pub fn cluster(&self, name: &str) -> Arc<MemoryCluster> {
        self.directory.cluster(name).expect("cluster is registered")
    }

    /// Ordered table with system columns, one tablet per entry of `rows`
    pub fn queue(&self, cluster: &str, path: &str, object_id: &str, rows: &[usize]) -> QueueTableRow {
        let storage = self.cluster(cluster);
        storage.create_table(
            path,
            object_id,
            rows.len(),
            Some(TableSchema::ordered(&[
                "payload",
                TIMESTAMP_COLUMN_NAME,
                CUMULATIVE_DATA_WEIGHT_COLUMN_NAME,
            ])),
        );
        for (tablet_index, &count) in rows.iter().enumerate() {
            if count > 0 {
                storage.append_rows(path, tablet_index, count, 64).unwrap();
            }
        }
        let mut row = QueueTableRow::ordered_table(QueueRef::new(cluster, path), object_id);
        row.auto_trim_config = AutoTrimConfig {
            enable: true,
            ..Default::default()
        };
        row
    }

    pub fn vital_consumer(&self, queue: &QueueRef, consumer: &QueueRef, offsets: &[i64]) {
        self.store.register(queue.clone(), consumer.clone(), true);
        self.store.publish_consumer_snapshot(
            ConsumerSnapshot::new(consumer.clone())
                .with_sub_snapshot(queue.clone(), SubConsumerSnapshot::from_offsets(offsets)),
        );
    }

    pub fn agent(&self, leading: bool) -> QueueAgent {
        QueueAgent::new(
            self.directory.clone(),
            self.store.clone(),
            self.clock.clone(),
            trimming_config(),
            leading,
            false,
        )
        .unwrap()
    }

    pub fn trimmed_row_count(&self, cluster: &str, path: &str, tablet_index: usize) -> i64 {
        self.cluster(cluster)
            .tablet_counters(path, tablet_index)
            .map(|(trimmed, _)| trimmed)
            .unwrap()
    }
}

pub fn trimming_config() -> QueueControllerDynamicConfig {
    QueueControllerDynamicConfig {
        pass_period: Duration::from_millis(500),
        enable_automatic_trimming: true,
        ..Default::default()
    }
}
