//! Snapshot builder
//!
//! Turns the latest queue rows and the previous snapshot into a fresh
//! immutable [`QueueSnapshot`]. Building never fails outwardly: a failure is
//! recorded in the snapshot's `error` and the partitions computed so far are
//! kept.

use crate::client::directory::ClientDirectory;
use crate::client::storage::RowProbe;
use crate::core::time::{timestamp_to_instant, TimeProvider};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::snapshot::{PartitionMeta, PartitionSnapshot, QueueSnapshot};
use crate::queue::types::{
    ConsumerRegistrationRow, QueueFamily, QueueTableRow, ReplicatedTableMappingRow,
};
use crate::queue::write_rate::WriteRate;
use log::debug;
use std::collections::HashMap;

pub struct SnapshotBuilder<'a> {
    directory: &'a dyn ClientDirectory,
    clock: &'a dyn TimeProvider,
    previous: &'a QueueSnapshot,
    row: QueueTableRow,
    replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,
    registrations: Vec<ConsumerRegistrationRow>,
    logging_tag: &'a str,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(
        directory: &'a dyn ClientDirectory,
        clock: &'a dyn TimeProvider,
        previous: &'a QueueSnapshot,
        row: QueueTableRow,
        replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,
        registrations: Vec<ConsumerRegistrationRow>,
    ) -> Self {
        Self {
            directory,
            clock,
            previous,
            row,
            replicated_table_mapping_row,
            registrations,
            logging_tag: "",
        }
    }

    /// Suffix appended to every log message, e.g. `Queue: <ref>, Leading: <bool>`
    pub fn with_logging_tag(mut self, logging_tag: &'a str) -> Self {
        self.logging_tag = logging_tag;
        self
    }

    pub async fn build(self) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot {
            pass_index: self.previous.pass_index + 1,
            pass_instant: self.clock.now(),
            row: self.row.clone(),
            replicated_table_mapping_row: self.replicated_table_mapping_row.clone(),
            family: QueueFamily::OrderedDynamicTable,
            partition_count: 0,
            partition_snapshots: Vec::new(),
            has_timestamp_column: false,
            has_cumulative_data_weight_column: false,
            write_rate: WriteRate::default(),
            registrations: Vec::new(),
            error: None,
        };

        debug!(
            "Building queue snapshot (PassIndex: {}, {})",
            snapshot.pass_index, self.logging_tag
        );

        match self.fill(&mut snapshot).await {
            Ok(()) => debug!("Queue snapshot built ({})", self.logging_tag),
            Err(error) => {
                debug!(
                    "Error updating queue snapshot (Error: {}, {})",
                    error, self.logging_tag
                );
                snapshot.error = Some(error);
            }
        }
        snapshot
    }

    async fn fill(&self, snapshot: &mut QueueSnapshot) -> QueueResult<()> {
        let sync_context = self
            .directory
            .get_native_sync_client(&self.row, self.replicated_table_mapping_row.as_ref())?;
        let client = &sync_context.client;

        let table_info = client.get_table_mount_info(&sync_context.path).await?;
        debug!(
            "Table info collected (TabletCount: {}, {})",
            table_info.tablets.len(),
            self.logging_tag
        );

        let schema = table_info.schema.as_ref().ok_or_else(|| QueueError::InvalidSchema {
            reason: format!("table {} has no schema", sync_context.path),
        })?;
        if schema.sorted {
            return Err(QueueError::InvalidSchema {
                reason: format!("table {} is sorted", sync_context.path),
            });
        }
        snapshot.has_timestamp_column = schema.has_timestamp_column();
        snapshot.has_cumulative_data_weight_column = schema.has_cumulative_data_weight_column();

        snapshot.partition_count = table_info.tablets.len();
        snapshot.partition_snapshots = vec![PartitionSnapshot::default(); snapshot.partition_count];

        let mut tablet_indexes = Vec::with_capacity(snapshot.partition_count);
        for (index, tablet) in table_info.tablets.iter().enumerate() {
            let partition = &mut snapshot.partition_snapshots[index];
            partition.tablet_state = tablet.state;
            if !tablet.state.is_readable() {
                partition.error = Some(QueueError::TabletNotMounted {
                    tablet_id: tablet.tablet_id.clone(),
                    state: tablet.state,
                });
                continue;
            }
            tablet_indexes.push(index);
            partition.meta = Some(PartitionMeta {
                cell_id: tablet.cell_id.clone(),
                host: client
                    .find_cell_descriptor(&tablet.cell_id)
                    .and_then(|descriptor| descriptor.leader_host()),
            });
        }

        let tablet_infos = client
            .get_tablet_infos(&sync_context.path, &tablet_indexes)
            .await?;
        if tablet_infos.len() != tablet_indexes.len() {
            return Err(QueueError::MissingData {
                message: format!(
                    "Expected {} tablet infos, got {}",
                    tablet_indexes.len(),
                    tablet_infos.len()
                ),
            });
        }

        let now = snapshot.pass_instant;
        for (&index, info) in tablet_indexes.iter().zip(&tablet_infos) {
            let partition = &mut snapshot.partition_snapshots[index];
            partition.upper_row_index = info.total_row_count;
            partition.lower_row_index = info.trimmed_row_count;
            partition.available_row_count = partition.upper_row_index - partition.lower_row_index;

            if info.last_write_timestamp != 0 {
                let last_commit = timestamp_to_instant(info.last_write_timestamp);
                partition.last_row_commit_time = Some(last_commit);
                partition.commit_idle_time = Some((now - last_commit).to_std().unwrap_or_default());
            }

            if let Some(previous) = self.previous.partition_snapshots.get(index) {
                partition.write_rate = previous.write_rate.clone();
            }
            partition.write_rate.row_count.update(info.total_row_count, now);
        }

        if snapshot.has_cumulative_data_weight_column {
            self.collect_cumulative_data_weights(snapshot).await?;
        }

        for &index in &tablet_indexes {
            let rate = snapshot.partition_snapshots[index].write_rate.clone();
            snapshot.write_rate += &rate;
        }

        snapshot.registrations = self.registrations.clone();
        Ok(())
    }

    /// Probe the first and last live row of each partition in one batch
    async fn collect_cumulative_data_weights(&self, snapshot: &mut QueueSnapshot) -> QueueResult<()> {
        debug!(
            "Collecting queue cumulative data weights ({})",
            self.logging_tag
        );

        let mut probes = Vec::new();
        for (index, partition) in snapshot.partition_snapshots.iter().enumerate() {
            if partition.is_ok() && partition.upper_row_index > 0 {
                probes.push(RowProbe {
                    tablet_index: index,
                    row_index: partition.lower_row_index,
                });
                if partition.upper_row_index - 1 != partition.lower_row_index {
                    probes.push(RowProbe {
                        tablet_index: index,
                        row_index: partition.upper_row_index - 1,
                    });
                }
            }
        }
        if probes.is_empty() {
            return Ok(());
        }

        let read_context = self
            .directory
            .get_data_read_context(&self.row, self.replicated_table_mapping_row.as_ref())?;
        let weights = read_context
            .client
            .read_cumulative_data_weights(&read_context.path, &probes)
            .await
            .map_err(|error| error.context("Failed to collect cumulative data weights"))?;

        let by_row: HashMap<(usize, i64), i64> = weights
            .into_iter()
            .map(|weight| {
                (
                    (weight.tablet_index, weight.row_index),
                    weight.cumulative_data_weight,
                )
            })
            .collect();

        let now = snapshot.pass_instant;
        for (index, partition) in snapshot.partition_snapshots.iter_mut().enumerate() {
            if !partition.is_ok() || partition.upper_row_index == 0 {
                continue;
            }
            partition.trimmed_data_weight = by_row.get(&(index, partition.lower_row_index)).copied();
            partition.cumulative_data_weight =
                by_row.get(&(index, partition.upper_row_index - 1)).copied();
            if let Some(cumulative) = partition.cumulative_data_weight {
                partition.write_rate.data_weight.update(cumulative, now);
            }
            partition.available_data_weight = partition
                .cumulative_data_weight
                .zip(partition.trimmed_data_weight)
                .map(|(cumulative, trimmed)| cumulative - trimmed);
        }

        debug!(
            "Queue cumulative data weights collected ({})",
            self.logging_tag
        );
        Ok(())
    }
}
