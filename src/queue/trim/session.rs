//! Trim session of one replica
//!
//! Merges every constraint source into the replica's partition contexts and
//! issues the resulting trim requests. Errors returned from [`TrimSession::run`]
//! abort this replica only; partition failures are recorded on the contexts.

use crate::client::object_store::{vital_registrations, ObjectStore};
use crate::client::storage::SafeTrimRowCountRequest;
use crate::core::time::{instant_to_timestamp, timestamp_to_instant, Timestamp};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::snapshot::{QueueSnapshot, SubConsumerSnapshot};
use crate::queue::trim::context::{PartitionTrimContext, QueueTrimContext};
use crate::queue::trim::report::ReplicaTrimOutcome;
use crate::queue::types::{AutoTrimConfig, QueueRef, TabletState};
use futures::future::join_all;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct TrimSession<'a> {
    /// Control queue
    queue_ref: QueueRef,
    queue_snapshot: Arc<QueueSnapshot>,
    context: QueueTrimContext,
    /// Generated on the control queue's cluster at the start of the iteration
    current_timestamp: Timestamp,
    object_store: &'a dyn ObjectStore,
    logging_tag: String,
    vital_consumer_sub_snapshots: BTreeMap<QueueRef, Arc<SubConsumerSnapshot>>,
}

impl<'a> TrimSession<'a> {
    pub fn new(
        queue_snapshot: Arc<QueueSnapshot>,
        context: QueueTrimContext,
        current_timestamp: Timestamp,
        object_store: &'a dyn ObjectStore,
        controller_tag: &str,
    ) -> Self {
        let logging_tag = format!(
            "{}, Replica: {}, ObjectPath: {}",
            controller_tag, context.replica_ref, context.object_path
        );
        Self {
            queue_ref: queue_snapshot.queue_ref().clone(),
            queue_snapshot,
            context,
            current_timestamp,
            object_store,
            logging_tag,
            vital_consumer_sub_snapshots: BTreeMap::new(),
        }
    }

    pub async fn run(mut self) -> QueueResult<ReplicaTrimOutcome> {
        if let Some(error) = &self.context.replica_snapshot.error {
            return Err(error
                .clone()
                .context("Trimming iteration skipped due to queue replica error"));
        }
        if self.queue_snapshot.partition_count != self.context.replica_snapshot.partition_count {
            return Err(QueueError::trimming_skipped(format!(
                "control queue {} and replica queue {} do not have the same number of partitions: \
                 {} vs {}, respectively; this is probably a misconfiguration",
                self.queue_ref,
                self.context.replica_ref,
                self.queue_snapshot.partition_count,
                self.context.replica_snapshot.partition_count
            )));
        }

        debug!("Performing trimming iteration ({})", self.logging_tag);

        self.collect_vital_consumer_sub_snapshots()?;
        self.context.validate()?;
        self.handle_snapshot_errors();

        let auto_trim_config = self.queue_snapshot.row.auto_trim_config.clone();
        self.handle_retained_lifetime_duration(&auto_trim_config).await?;
        self.handle_retained_rows(&auto_trim_config)?;
        self.handle_vital_consumers();

        let trimmed = self.request_trimming().await;
        self.report_errors();

        Ok(ReplicaTrimOutcome::from_context(&self.context, &trimmed))
    }

    fn collect_vital_consumer_sub_snapshots(&mut self) -> QueueResult<()> {
        for registration in vital_registrations(self.object_store, &self.queue_ref) {
            let consumer = &registration.consumer;
            let consumer_snapshot = self
                .object_store
                .find_consumer_snapshot(consumer)
                .ok_or_else(|| {
                    QueueError::trimming_skipped(format!(
                        "missing registered vital consumer {}",
                        consumer
                    ))
                })?;
            if let Some(error) = &consumer_snapshot.error {
                return Err(error.clone().context(format!(
                    "Trimming iteration skipped due to erroneous registered vital consumer {}",
                    consumer
                )));
            }
            let sub_snapshot = consumer_snapshot
                .sub_snapshots
                .get(&self.queue_ref)
                .ok_or_else(|| {
                    QueueError::trimming_skipped(format!(
                        "vital consumer {} snapshot does not contain information about queue",
                        consumer
                    ))
                })?;
            self.vital_consumer_sub_snapshots
                .insert(consumer.clone(), sub_snapshot.clone());
        }

        if self.vital_consumer_sub_snapshots.is_empty() {
            return Err(QueueError::trimming_skipped(format!(
                "attempted trimming iteration on queue {} with no vital consumers",
                self.queue_ref
            )));
        }
        Ok(())
    }

    /// Errors of the control queue, the replica and the vital consumers
    fn handle_snapshot_errors(&mut self) {
        let queue_partitions = &self.queue_snapshot.partition_snapshots;
        let replica_partitions = &self.context.replica_snapshot.partition_snapshots;

        for partition in self.context.partition_contexts.iter_mut() {
            if !partition.is_ok() {
                continue;
            }
            let index = partition.partition_index;
            let replica_partition = &replica_partitions[index];

            if replica_partition.tablet_state != TabletState::Mounted {
                partition.set_error(QueueError::PartitionNotMounted {
                    partition_index: index,
                    state: replica_partition.tablet_state,
                });
                continue;
            }

            if let Some(error) = &queue_partitions[index].error {
                partition.set_error(error.clone());
            } else if let Some(error) = &replica_partition.error {
                partition.set_error(error.clone());
            } else {
                for (consumer, sub_snapshot) in &self.vital_consumer_sub_snapshots {
                    match sub_snapshot.partition_snapshots.get(index) {
                        Some(consumer_partition) => {
                            if let Some(error) = &consumer_partition.error {
                                partition.set_error(error.clone());
                                break;
                            }
                        }
                        None => {
                            partition.set_error(QueueError::MissingData {
                                message: format!(
                                    "Queue sub-snapshot for consumer {} does not contain a snapshot for partition {}",
                                    consumer, index
                                ),
                            });
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Rows committed before the left boundary of the second containing
    /// `now - lifetime` are safe to trim
    fn max_timestamp_to_trim(&self, lifetime: Duration) -> Timestamp {
        let now = timestamp_to_instant(self.current_timestamp);
        let barrier = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| now.checked_sub_signed(lifetime))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
        instant_to_timestamp(barrier)
    }

    async fn handle_retained_lifetime_duration(
        &mut self,
        auto_trim_config: &AutoTrimConfig,
    ) -> QueueResult<()> {
        let Some(lifetime) = auto_trim_config.retained_lifetime_duration else {
            return Ok(());
        };
        let max_timestamp_to_trim = self.max_timestamp_to_trim(lifetime);

        let requests: Vec<SafeTrimRowCountRequest> = self
            .context
            .partition_contexts
            .iter()
            .filter(|partition| partition.is_ok())
            .map(|partition| SafeTrimRowCountRequest {
                path: self.context.object_path.clone(),
                tablet_index: partition.partition_index,
                timestamp: max_timestamp_to_trim,
            })
            .collect();
        if requests.is_empty() {
            return Ok(());
        }

        let results = self
            .context
            .client
            .get_ordered_tablet_safe_trim_row_count(&requests)
            .await
            .map_err(|error| {
                error.context(format!(
                    "Unable to get safe trim row counts for replica {} to satisfy configured \
                     trimming parameters, trimming iteration skipped",
                    self.context.replica_ref
                ))
            })?;

        for (request, result) in requests.iter().zip(results) {
            let partition = &mut self.context.partition_contexts[request.tablet_index];
            match result {
                Ok(safe_trim_row_count) => partition.update(
                    &PartitionTrimContext::new(request.tablet_index).with_max(safe_trim_row_count),
                ),
                Err(error) => partition.set_error(error.context(format!(
                    "Error getting safe trim row count by timestamp {}, not trimming partition {}",
                    max_timestamp_to_trim, request.tablet_index
                ))),
            }
        }
        Ok(())
    }

    fn handle_retained_rows(&mut self, auto_trim_config: &AutoTrimConfig) -> QueueResult<()> {
        let Some(retained_rows) = auto_trim_config.retained_rows else {
            return Ok(());
        };
        auto_trim_config.validate()?;
        for (partition, partition_snapshot) in self
            .context
            .partition_contexts
            .iter_mut()
            .zip(&self.context.replica_snapshot.partition_snapshots)
        {
            let ceiling = partition_snapshot
                .upper_row_index
                .saturating_sub(retained_rows)
                .max(0);
            partition.update(&PartitionTrimContext::new(partition.partition_index).with_max(ceiling));
        }
        Ok(())
    }

    /// Trimming never advances past the slowest vital consumer
    fn handle_vital_consumers(&mut self) {
        for partition in self.context.partition_contexts.iter_mut() {
            if !partition.is_ok() {
                continue;
            }
            let index = partition.partition_index;
            let floor = self
                .vital_consumer_sub_snapshots
                .values()
                .filter_map(|sub_snapshot| sub_snapshot.partition_snapshots.get(index))
                .map(|consumer_partition| consumer_partition.next_row_index)
                .min();
            if let Some(floor) = floor {
                partition.update(&PartitionTrimContext::new(index).with_min(floor));
            }
        }
    }

    /// Issue all advancing trims concurrently; returns the successful ones
    async fn request_trimming(&mut self) -> Vec<(usize, i64)> {
        let mut targets = Vec::new();
        for partition in &self.context.partition_contexts {
            let index = partition.partition_index;
            let current = self.context.replica_snapshot.partition_snapshots[index].lower_row_index;
            if let Some(updated) = partition.updated_trimmed_row_count(current) {
                debug!(
                    "Trimming partition (Partition: {}, TrimmedRowCount: {} -> {}, {})",
                    index, current, updated, self.logging_tag
                );
                targets.push((index, updated));
            }
        }

        let client = &self.context.client;
        let object_path = &self.context.object_path;
        let results = join_all(
            targets
                .iter()
                .map(|&(index, updated)| client.trim_table(object_path, index, updated)),
        )
        .await;

        let mut trimmed = Vec::with_capacity(targets.len());
        for ((index, updated), result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => trimmed.push((index, updated)),
                Err(error) => self.context.partition_contexts[index].set_error(error.context(
                    format!(
                        "Error occurred while executing trimming request for partition {}",
                        index
                    ),
                )),
            }
        }
        trimmed
    }

    fn report_errors(&self) {
        for (index, error) in self.context.partition_errors() {
            debug!(
                "Failed to trim partition (PartitionIndex: {}, Error: {}, {})",
                index, error, self.logging_tag
            );
        }
    }
}
