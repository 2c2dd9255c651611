//! Cluster fixture files
//!
//! Describe in-memory clusters, their tables and the queue agent state
//! (queue rows, replica mappings, registrations, consumer offsets) that the
//! command-line driver runs against.
//!
//! ```toml
//! [[clusters]]
//! name = "hume"
//!
//! [[clusters.tables]]
//! path = "//queues/events"
//! object_id = "1-2-3-4"
//! tablets = 2
//! rows = [10, 4]
//!
//! [[queues]]
//! ref = { cluster = "hume", path = "//queues/events" }
//! object_id = "1-2-3-4"
//! object_type = "table"
//! dynamic = true
//! sorted = false
//! auto_trim_config = { enable = true }
//!
//! [[registrations]]
//! queue = { cluster = "hume", path = "//queues/events" }
//! consumer = { cluster = "hume", path = "//consumers/reader" }
//! vital = true
//!
//! [[consumers]]
//! consumer = { cluster = "hume", path = "//consumers/reader" }
//! queue = { cluster = "hume", path = "//queues/events" }
//! offsets = [6, 4]
//! ```

use super::cli::config::ConfigError;
use crate::client::memory::{MemoryClientDirectory, MemoryCluster, MemoryObjectStore};
use crate::client::storage::{
    TableSchema, CUMULATIVE_DATA_WEIGHT_COLUMN_NAME, TIMESTAMP_COLUMN_NAME,
};
use crate::core::time::TimeProvider;
use crate::queue::error::QueueResult;
use crate::queue::snapshot::{ConsumerSnapshot, SubConsumerSnapshot};
use crate::queue::types::{
    ConsumerRegistrationRow, QueueRef, QueueTableRow, ReplicatedTableMappingRow, TabletState,
};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn default_row_data_weight() -> i64 {
    100
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub path: String,
    pub object_id: String,
    pub tablets: usize,
    /// Rows appended to each tablet, by tablet index
    #[serde(default)]
    pub rows: Vec<usize>,
    #[serde(default = "default_row_data_weight")]
    pub row_data_weight: i64,
    #[serde(default = "enabled")]
    pub timestamp_column: bool,
    #[serde(default = "enabled")]
    pub cumulative_data_weight_column: bool,
    #[serde(default)]
    pub sorted: bool,
    /// Tablet indexes left unmounted
    #[serde(default)]
    pub unmounted: Vec<usize>,
}

impl TableSpec {
    fn schema(&self) -> TableSchema {
        let mut columns = vec!["data"];
        if self.timestamp_column {
            columns.push(TIMESTAMP_COLUMN_NAME);
        }
        if self.cumulative_data_weight_column {
            columns.push(CUMULATIVE_DATA_WEIGHT_COLUMN_NAME);
        }
        let mut schema = TableSchema::ordered(&columns);
        schema.sorted = self.sorted;
        schema
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellSpec {
    pub cell_id: String,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub cells: Vec<CellSpec>,
}

/// Offsets of one consumer in one queue
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerSpec {
    pub consumer: QueueRef,
    pub queue: QueueRef,
    pub offsets: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterFixture {
    pub clusters: Vec<ClusterSpec>,
    pub queues: Vec<QueueTableRow>,
    pub replicated_table_mappings: Vec<ReplicatedTableMappingRow>,
    pub registrations: Vec<ConsumerRegistrationRow>,
    pub consumers: Vec<ConsumerSpec>,
}

/// In-memory collaborators built from a fixture
pub struct LoadedFixture {
    pub directory: Arc<MemoryClientDirectory>,
    pub object_store: Arc<MemoryObjectStore>,
    pub queues: Vec<QueueTableRow>,
    pub replicated_table_mappings: Vec<ReplicatedTableMappingRow>,
}

impl ClusterFixture {
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents, path)
    }

    /// Create the clusters and populate them, committing rows at `clock`'s time
    pub fn materialize(&self, clock: Arc<dyn TimeProvider>) -> QueueResult<LoadedFixture> {
        let directory = Arc::new(MemoryClientDirectory::new());
        for spec in &self.clusters {
            let cluster = Arc::new(MemoryCluster::new(spec.name.clone(), clock.clone()));

            let max_tablets = spec.tables.iter().map(|table| table.tablets).max().unwrap_or(0);
            for index in 0..max_tablets {
                cluster.add_cell(
                    &format!("cell-{}", index),
                    &format!("{}-node-{}", spec.name, index),
                );
            }
            for cell in &spec.cells {
                cluster.add_cell(&cell.cell_id, &cell.host);
            }

            for table in &spec.tables {
                cluster.create_table(
                    &table.path,
                    &table.object_id,
                    table.tablets,
                    Some(table.schema()),
                );
                for (tablet_index, &count) in table.rows.iter().enumerate() {
                    if count > 0 {
                        cluster.append_rows(
                            &table.path,
                            tablet_index,
                            count,
                            table.row_data_weight,
                        )?;
                    }
                }
                for &tablet_index in &table.unmounted {
                    cluster.set_tablet_state(&table.path, tablet_index, TabletState::Unmounted);
                }
                debug!(
                    "Fixture table created (Cluster: {}, Path: {}, Tablets: {})",
                    spec.name, table.path, table.tablets
                );
            }
            directory.register(cluster);
        }

        let object_store = Arc::new(MemoryObjectStore::new());
        for registration in &self.registrations {
            object_store.register(
                registration.queue.clone(),
                registration.consumer.clone(),
                registration.vital,
            );
        }

        let mut consumers: BTreeMap<QueueRef, ConsumerSnapshot> = BTreeMap::new();
        for spec in &self.consumers {
            let snapshot = consumers
                .remove(&spec.consumer)
                .unwrap_or_else(|| ConsumerSnapshot::new(spec.consumer.clone()));
            consumers.insert(
                spec.consumer.clone(),
                snapshot.with_sub_snapshot(
                    spec.queue.clone(),
                    SubConsumerSnapshot::from_offsets(&spec.offsets),
                ),
            );
        }
        for snapshot in consumers.into_values() {
            object_store.publish_consumer_snapshot(snapshot);
        }

        Ok(LoadedFixture {
            directory,
            object_store,
            queues: self.queues.clone(),
            replicated_table_mappings: self.replicated_table_mappings.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::object_store::ObjectStore;
    use crate::core::time::MockTimeProvider;
    use crate::queue::types::ObjectKind;

    const FIXTURE: &str = r#"
        [[clusters]]
        name = "hume"

        [[clusters.tables]]
        path = "//queues/events"
        object_id = "1-2-3-4"
        tablets = 2
        rows = [10, 4]
        unmounted = [1]

        [[queues]]
        ref = { cluster = "hume", path = "//queues/events" }
        object_id = "1-2-3-4"
        object_type = "table"
        dynamic = true
        sorted = false

        [[registrations]]
        queue = { cluster = "hume", path = "//queues/events" }
        consumer = { cluster = "hume", path = "//consumers/reader" }
        vital = true

        [[consumers]]
        consumer = { cluster = "hume", path = "//consumers/reader" }
        queue = { cluster = "hume", path = "//queues/events" }
        offsets = [6, 4]
    "#;

    #[test]
    fn test_materialize_fixture() {
        let fixture = ClusterFixture::from_toml_str(FIXTURE, Path::new("cluster.toml")).unwrap();
        let loaded = fixture
            .materialize(Arc::new(MockTimeProvider::new()))
            .unwrap();

        let cluster = loaded.directory.cluster("hume").unwrap();
        assert_eq!(cluster.tablet_counters("//queues/events", 0), Some((0, 10)));
        assert_eq!(cluster.tablet_counters("//queues/events", 1), Some((0, 4)));
        assert_eq!(loaded.queues.len(), 1);

        let queue = QueueRef::new("hume", "//queues/events");
        let consumer = QueueRef::new("hume", "//consumers/reader");
        assert_eq!(
            loaded
                .object_store
                .get_registrations(&queue, ObjectKind::Queue)
                .len(),
            1
        );
        let snapshot = loaded.object_store.find_consumer_snapshot(&consumer).unwrap();
        assert_eq!(
            snapshot.sub_snapshots[&queue].partition_snapshots[0].next_row_index,
            6
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ClusterFixture::from_toml_str("[[clusters]]\nname = \"a\"\nsize = 3", Path::new("c.toml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
