//! In-memory cluster, client directory and object store
//!
//! Backs the command-line dry run and the test suites. Every storage
//! operation can be made to fail, either entirely or for single tablets.

use crate::client::directory::ClientDirectory;
use crate::client::object_store::ObjectStore;
use crate::client::storage::{
    CellDescriptor, CellPeer, CumulativeDataWeight, ReplicationCard, RowProbe,
    SafeTrimRowCountRequest, StorageClient, TableMountInfo, TableSchema, TabletMountInfo,
    TabletRowInfo,
};
use crate::core::time::{instant_to_timestamp, TimeProvider, Timestamp};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::snapshot::{ConsumerSnapshot, ObjectSnapshot, QueueSnapshot};
use crate::queue::types::{ConsumerRegistrationRow, ObjectKind, QueueRef, TabletState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Storage operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    TableMountInfo,
    TabletInfos,
    CumulativeDataWeights,
    SafeTrimRowCount,
    GenerateTimestamp,
    ReplicationCard,
    Trim,
}

/// Trim request accepted by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimRecord {
    pub path: String,
    pub tablet_index: usize,
    pub trimmed_row_count: i64,
}

#[derive(Debug, Clone, Copy)]
struct MemoryRow {
    timestamp: Timestamp,
    data_weight: i64,
}

#[derive(Debug, Clone)]
struct MemoryTablet {
    tablet_id: String,
    cell_id: String,
    state: TabletState,
    rows: Vec<MemoryRow>,
    trimmed_row_count: i64,
    last_write_timestamp: Timestamp,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    object_id: String,
    schema: Option<TableSchema>,
    tablets: Vec<MemoryTablet>,
}

#[derive(Default)]
struct ClusterState {
    tables: HashMap<String, MemoryTable>,
    cells: HashMap<String, CellDescriptor>,
    replication_cards: HashMap<String, ReplicationCard>,
    failures: HashSet<FailPoint>,
    failing_tablets: HashSet<(FailPoint, usize)>,
    trim_log: Vec<TrimRecord>,
    last_timestamp: Timestamp,
}

impl ClusterState {
    /// Resolve a table by path or by `#<object id>`
    fn table_key(&self, path: &str) -> Option<String> {
        if let Some(object_id) = path.strip_prefix('#') {
            self.tables
                .iter()
                .find(|(_, table)| table.object_id == object_id)
                .map(|(key, _)| key.clone())
        } else if self.tables.contains_key(path) {
            Some(path.to_string())
        } else {
            None
        }
    }
}

pub struct MemoryCluster {
    name: String,
    clock: Arc<dyn TimeProvider>,
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new(name: impl Into<String>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            name: name.into(),
            clock,
            state: Mutex::new(ClusterState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, state: &ClusterState, point: FailPoint, operation: &str) -> QueueResult<()> {
        if state.failures.contains(&point) {
            return Err(QueueError::storage(
                self.name.clone(),
                operation,
                "injected failure",
            ));
        }
        Ok(())
    }

    fn check_tablet(
        &self,
        state: &ClusterState,
        point: FailPoint,
        operation: &str,
        tablet_index: usize,
    ) -> QueueResult<()> {
        if state.failing_tablets.contains(&(point, tablet_index)) {
            return Err(QueueError::storage(
                self.name.clone(),
                operation,
                format!("injected failure for tablet {}", tablet_index),
            ));
        }
        Ok(())
    }

    fn next_timestamp(&self, state: &mut ClusterState) -> Timestamp {
        let base = instant_to_timestamp(self.clock.now());
        let timestamp = if base > state.last_timestamp {
            base
        } else {
            state.last_timestamp + 1
        };
        state.last_timestamp = timestamp;
        timestamp
    }

    fn with_table<T>(
        &self,
        path: &str,
        f: impl FnOnce(&mut MemoryTable) -> QueueResult<T>,
    ) -> QueueResult<T> {
        let mut state = self.state();
        let key = state.table_key(path).ok_or_else(|| QueueError::TableNotFound {
            cluster: self.name.clone(),
            path: path.to_string(),
        })?;
        let table = state
            .tables
            .get_mut(&key)
            .ok_or_else(|| QueueError::TableNotFound {
                cluster: self.name.clone(),
                path: path.to_string(),
            })?;
        f(table)
    }

    /// Create an ordered table with `tablet_count` mounted tablets
    pub fn create_table(
        &self,
        path: &str,
        object_id: &str,
        tablet_count: usize,
        schema: Option<TableSchema>,
    ) {
        let tablets = (0..tablet_count)
            .map(|index| MemoryTablet {
                tablet_id: format!("{}-tablet-{}", object_id, index),
                cell_id: format!("cell-{}", index),
                state: TabletState::Mounted,
                rows: Vec::new(),
                trimmed_row_count: 0,
                last_write_timestamp: 0,
            })
            .collect();
        self.state().tables.insert(
            path.to_string(),
            MemoryTable {
                object_id: object_id.to_string(),
                schema,
                tablets,
            },
        );
    }

    pub fn add_cell(&self, cell_id: &str, host: &str) {
        self.state().cells.insert(
            cell_id.to_string(),
            CellDescriptor {
                cell_id: cell_id.to_string(),
                peers: vec![CellPeer {
                    address: host.to_string(),
                    voting: true,
                }],
            },
        );
    }

    pub fn set_tablet_state(&self, path: &str, tablet_index: usize, state: TabletState) {
        let _ = self.with_table(path, |table| {
            if let Some(tablet) = table.tablets.get_mut(tablet_index) {
                tablet.state = state;
            }
            Ok(())
        });
    }

    /// Append `count` rows of `data_weight` bytes each, committed now
    pub fn append_rows(
        &self,
        path: &str,
        tablet_index: usize,
        count: usize,
        data_weight: i64,
    ) -> QueueResult<()> {
        let mut state = self.state();
        let key = state.table_key(path).ok_or_else(|| QueueError::TableNotFound {
            cluster: self.name.clone(),
            path: path.to_string(),
        })?;
        let mut timestamps = Vec::with_capacity(count);
        for _ in 0..count {
            timestamps.push(self.next_timestamp(&mut state));
        }
        let tablet = state
            .tables
            .get_mut(&key)
            .and_then(|table| table.tablets.get_mut(tablet_index))
            .ok_or_else(|| QueueError::MissingData {
                message: format!("Tablet {} of {} does not exist", tablet_index, path),
            })?;
        for timestamp in timestamps {
            tablet.rows.push(MemoryRow {
                timestamp,
                data_weight,
            });
            tablet.last_write_timestamp = timestamp;
        }
        Ok(())
    }

    /// `(trimmed_row_count, total_row_count)` of a tablet
    pub fn tablet_counters(&self, path: &str, tablet_index: usize) -> Option<(i64, i64)> {
        self.with_table(path, |table| {
            Ok(table
                .tablets
                .get(tablet_index)
                .map(|tablet| (tablet.trimmed_row_count, tablet.rows.len() as i64)))
        })
        .ok()
        .flatten()
    }

    pub fn set_replication_card(&self, card: ReplicationCard) {
        self.state()
            .replication_cards
            .insert(card.card_id.clone(), card);
    }

    pub fn fail(&self, point: FailPoint) {
        self.state().failures.insert(point);
    }

    pub fn fail_tablet(&self, point: FailPoint, tablet_index: usize) {
        self.state().failing_tablets.insert((point, tablet_index));
    }

    pub fn recover(&self, point: FailPoint) {
        let mut state = self.state();
        state.failures.remove(&point);
        state.failing_tablets.retain(|(failing, _)| *failing != point);
    }

    pub fn trim_log(&self) -> Vec<TrimRecord> {
        self.state().trim_log.clone()
    }

    pub fn clear_trim_log(&self) {
        self.state().trim_log.clear();
    }
}

#[async_trait]
impl StorageClient for MemoryCluster {
    fn cluster(&self) -> &str {
        &self.name
    }

    async fn get_table_mount_info(&self, path: &str) -> QueueResult<TableMountInfo> {
        self.check(&self.state(), FailPoint::TableMountInfo, "get_table_mount_info")?;
        self.with_table(path, |table| {
            Ok(TableMountInfo {
                tablets: table
                    .tablets
                    .iter()
                    .map(|tablet| TabletMountInfo {
                        tablet_id: tablet.tablet_id.clone(),
                        cell_id: tablet.cell_id.clone(),
                        state: tablet.state,
                    })
                    .collect(),
                schema: table.schema.clone(),
            })
        })
    }

    fn find_cell_descriptor(&self, cell_id: &str) -> Option<CellDescriptor> {
        self.state().cells.get(cell_id).cloned()
    }

    async fn get_tablet_infos(
        &self,
        path: &str,
        tablet_indexes: &[usize],
    ) -> QueueResult<Vec<TabletRowInfo>> {
        self.check(&self.state(), FailPoint::TabletInfos, "get_tablet_infos")?;
        let cluster = self.name.clone();
        self.with_table(path, |table| {
            tablet_indexes
                .iter()
                .map(|&index| {
                    let tablet = table.tablets.get(index).ok_or_else(|| {
                        QueueError::storage(
                            cluster.clone(),
                            "get_tablet_infos",
                            format!("no tablet with index {}", index),
                        )
                    })?;
                    if !tablet.state.is_readable() {
                        return Err(QueueError::storage(
                            cluster.clone(),
                            "get_tablet_infos",
                            format!("tablet {} is {}", tablet.tablet_id, tablet.state),
                        ));
                    }
                    Ok(TabletRowInfo {
                        total_row_count: tablet.rows.len() as i64,
                        trimmed_row_count: tablet.trimmed_row_count,
                        last_write_timestamp: tablet.last_write_timestamp,
                    })
                })
                .collect()
        })
    }

    async fn read_cumulative_data_weights(
        &self,
        path: &str,
        probes: &[RowProbe],
    ) -> QueueResult<Vec<CumulativeDataWeight>> {
        self.check(
            &self.state(),
            FailPoint::CumulativeDataWeights,
            "read_cumulative_data_weights",
        )?;
        self.with_table(path, |table| {
            let mut result = Vec::with_capacity(probes.len());
            for probe in probes {
                let Some(tablet) = table.tablets.get(probe.tablet_index) else {
                    continue;
                };
                if probe.row_index < 0 || probe.row_index as usize >= tablet.rows.len() {
                    continue;
                }
                let cumulative_data_weight = tablet.rows[..=probe.row_index as usize]
                    .iter()
                    .map(|row| row.data_weight)
                    .sum();
                result.push(CumulativeDataWeight {
                    tablet_index: probe.tablet_index,
                    row_index: probe.row_index,
                    cumulative_data_weight,
                });
            }
            Ok(result)
        })
    }

    async fn get_ordered_tablet_safe_trim_row_count(
        &self,
        requests: &[SafeTrimRowCountRequest],
    ) -> QueueResult<Vec<QueueResult<i64>>> {
        let state = self.state();
        self.check(
            &state,
            FailPoint::SafeTrimRowCount,
            "get_ordered_tablet_safe_trim_row_count",
        )?;
        Ok(requests
            .iter()
            .map(|request| {
                self.check_tablet(
                    &state,
                    FailPoint::SafeTrimRowCount,
                    "get_ordered_tablet_safe_trim_row_count",
                    request.tablet_index,
                )?;
                let tablet = state
                    .table_key(&request.path)
                    .and_then(|key| state.tables.get(&key))
                    .and_then(|table| table.tablets.get(request.tablet_index))
                    .ok_or_else(|| QueueError::TableNotFound {
                        cluster: self.name.clone(),
                        path: request.path.clone(),
                    })?;
                let safe_row_count = tablet
                    .rows
                    .iter()
                    .take_while(|row| row.timestamp < request.timestamp)
                    .count();
                Ok(safe_row_count as i64)
            })
            .collect())
    }

    async fn trim_table(
        &self,
        path: &str,
        tablet_index: usize,
        trimmed_row_count: i64,
    ) -> QueueResult<()> {
        {
            let state = self.state();
            self.check(&state, FailPoint::Trim, "trim_table")?;
            self.check_tablet(&state, FailPoint::Trim, "trim_table", tablet_index)?;
        }
        let cluster = self.name.clone();
        self.with_table(path, |table| {
            let tablet = table.tablets.get_mut(tablet_index).ok_or_else(|| {
                QueueError::storage(
                    cluster.clone(),
                    "trim_table",
                    format!("no tablet with index {}", tablet_index),
                )
            })?;
            if tablet.state != TabletState::Mounted {
                return Err(QueueError::storage(
                    cluster.clone(),
                    "trim_table",
                    format!("tablet {} is {}", tablet.tablet_id, tablet.state),
                ));
            }
            if trimmed_row_count > tablet.rows.len() as i64 {
                return Err(QueueError::storage(
                    cluster.clone(),
                    "trim_table",
                    format!(
                        "cannot trim tablet {} up to {} rows, it only has {}",
                        tablet.tablet_id,
                        trimmed_row_count,
                        tablet.rows.len()
                    ),
                ));
            }
            tablet.trimmed_row_count = tablet.trimmed_row_count.max(trimmed_row_count);
            Ok(())
        })?;
        self.state().trim_log.push(TrimRecord {
            path: path.to_string(),
            tablet_index,
            trimmed_row_count,
        });
        Ok(())
    }

    async fn generate_timestamp(&self) -> QueueResult<Timestamp> {
        let mut state = self.state();
        self.check(&state, FailPoint::GenerateTimestamp, "generate_timestamp")?;
        Ok(self.next_timestamp(&mut state))
    }

    async fn get_replication_card(&self, card_id: &str) -> QueueResult<ReplicationCard> {
        let state = self.state();
        self.check(&state, FailPoint::ReplicationCard, "get_replication_card")?;
        state
            .replication_cards
            .get(card_id)
            .cloned()
            .ok_or_else(|| QueueError::MissingData {
                message: format!("Replication card {} is not found", card_id),
            })
    }
}

/// Client directory over a fixed set of in-memory clusters
#[derive(Default)]
pub struct MemoryClientDirectory {
    clusters: RwLock<HashMap<String, Arc<MemoryCluster>>>,
}

impl MemoryClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cluster: Arc<MemoryCluster>) {
        self.clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cluster.cluster().to_string(), cluster);
    }

    pub fn cluster(&self, name: &str) -> Option<Arc<MemoryCluster>> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl ClientDirectory for MemoryClientDirectory {
    fn get_client(&self, cluster: &str) -> QueueResult<Arc<dyn StorageClient>> {
        self.cluster(cluster)
            .map(|client| client as Arc<dyn StorageClient>)
            .ok_or_else(|| QueueError::UnknownCluster {
                cluster: cluster.to_string(),
            })
    }

    fn get_federated_client(&self, clusters: &[String]) -> QueueResult<Arc<dyn StorageClient>> {
        clusters
            .iter()
            .find_map(|cluster| self.cluster(cluster))
            .map(|client| client as Arc<dyn StorageClient>)
            .ok_or_else(|| QueueError::UnknownCluster {
                cluster: clusters.join(","),
            })
    }
}

/// Object store holding registrations and explicitly published snapshots
#[derive(Default)]
pub struct MemoryObjectStore {
    registrations: RwLock<Vec<ConsumerRegistrationRow>>,
    snapshots: RwLock<HashMap<QueueRef, ObjectSnapshot>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue: QueueRef, consumer: QueueRef, vital: bool) {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registrations.retain(|row| !(row.queue == queue && row.consumer == consumer));
        registrations.push(ConsumerRegistrationRow {
            queue,
            consumer,
            vital,
        });
    }

    pub fn unregister(&self, queue: &QueueRef, consumer: &QueueRef) {
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|row| !(&row.queue == queue && &row.consumer == consumer));
    }

    pub fn publish_queue_snapshot(&self, snapshot: Arc<QueueSnapshot>) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.queue_ref().clone(), ObjectSnapshot::Queue(snapshot));
    }

    pub fn publish_consumer_snapshot(&self, snapshot: ConsumerSnapshot) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                snapshot.consumer_ref.clone(),
                ObjectSnapshot::Consumer(Arc::new(snapshot)),
            );
    }

    pub fn remove_snapshot(&self, object: &QueueRef) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(object);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_registrations(
        &self,
        object: &QueueRef,
        kind: ObjectKind,
    ) -> Vec<ConsumerRegistrationRow> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|row| match kind {
                ObjectKind::Queue => &row.queue == object,
                ObjectKind::Consumer => &row.consumer == object,
            })
            .cloned()
            .collect()
    }

    fn find_snapshot(&self, object: &QueueRef) -> Option<ObjectSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(object)
            .cloned()
    }
}
