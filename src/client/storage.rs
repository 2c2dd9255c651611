//! Storage client surface consumed by the snapshot builder and trimming

use crate::core::time::Timestamp;
use crate::queue::error::QueueResult;
use crate::queue::types::{ReplicationProgress, TabletState};
use async_trait::async_trait;

/// System column holding the commit timestamp of a row
pub const TIMESTAMP_COLUMN_NAME: &str = "$timestamp";
/// System column holding the running total of row data weight
pub const CUMULATIVE_DATA_WEIGHT_COLUMN_NAME: &str = "$cumulative_data_weight";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub sorted: bool,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn ordered(columns: &[&str]) -> Self {
        Self {
            sorted: false,
            columns: columns.iter().map(|column| column.to_string()).collect(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column == name)
    }

    pub fn has_timestamp_column(&self) -> bool {
        self.has_column(TIMESTAMP_COLUMN_NAME)
    }

    pub fn has_cumulative_data_weight_column(&self) -> bool {
        self.has_column(CUMULATIVE_DATA_WEIGHT_COLUMN_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletMountInfo {
    pub tablet_id: String,
    pub cell_id: String,
    pub state: TabletState,
}

/// Result of a table mount lookup; one tablet per partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMountInfo {
    pub tablets: Vec<TabletMountInfo>,
    pub schema: Option<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPeer {
    pub address: String,
    pub voting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellDescriptor {
    pub cell_id: String,
    pub peers: Vec<CellPeer>,
}

impl CellDescriptor {
    /// Address of the first voting peer
    pub fn leader_host(&self) -> Option<String> {
        self.peers
            .iter()
            .find(|peer| peer.voting)
            .map(|peer| peer.address.clone())
    }
}

/// Row counters of a mounted tablet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabletRowInfo {
    pub total_row_count: i64,
    pub trimmed_row_count: i64,
    pub last_write_timestamp: Timestamp,
}

/// Row whose cumulative data weight should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowProbe {
    pub tablet_index: usize,
    pub row_index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CumulativeDataWeight {
    pub tablet_index: usize,
    pub row_index: i64,
    pub cumulative_data_weight: i64,
}

/// Ask for the number of leading rows committed strictly before `timestamp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTrimRowCountRequest {
    pub path: String,
    pub tablet_index: usize,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationCardReplica {
    pub cluster: String,
    pub replica_path: String,
    pub progress: ReplicationProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationCard {
    pub card_id: String,
    pub replicas: Vec<ReplicationCardReplica>,
}

/// Client of one cluster (or a federation of clusters)
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Name of the cluster this client talks to
    fn cluster(&self) -> &str;

    async fn get_table_mount_info(&self, path: &str) -> QueueResult<TableMountInfo>;

    /// Cached cell directory lookup; never blocks
    fn find_cell_descriptor(&self, cell_id: &str) -> Option<CellDescriptor>;

    /// Row counters for the given tablets, in request order
    async fn get_tablet_infos(
        &self,
        path: &str,
        tablet_indexes: &[usize],
    ) -> QueueResult<Vec<TabletRowInfo>>;

    async fn read_cumulative_data_weights(
        &self,
        path: &str,
        probes: &[RowProbe],
    ) -> QueueResult<Vec<CumulativeDataWeight>>;

    /// One result per request, in request order; the outer error fails the whole batch
    async fn get_ordered_tablet_safe_trim_row_count(
        &self,
        requests: &[SafeTrimRowCountRequest],
    ) -> QueueResult<Vec<QueueResult<i64>>>;

    async fn trim_table(
        &self,
        path: &str,
        tablet_index: usize,
        trimmed_row_count: i64,
    ) -> QueueResult<()>;

    async fn generate_timestamp(&self) -> QueueResult<Timestamp>;

    async fn get_replication_card(&self, card_id: &str) -> QueueResult<ReplicationCard>;
}
