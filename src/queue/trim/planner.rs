//! Replica discovery
//!
//! Decides which physical tables have to be trimmed for a queue and seeds
//! their partition contexts with the structural ceilings of the topology:
//! a replica's own upper row index for replicated tables, the replication
//! progress for chaos-replicated tables.

use crate::client::directory::ClientDirectory;
use crate::client::object_store::ObjectStore;
use crate::client::storage::SafeTrimRowCountRequest;
use crate::core::time::Timestamp;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::snapshot::QueueSnapshot;
use crate::queue::trim::context::{PartitionTrimContext, QueueTrimContext};
use crate::queue::types::{ObjectType, QueueRef, ReplicatedTableMappingRow};
use futures::future::join_all;
use log::debug;
use std::sync::Arc;

/// One replica to trim, or the reason it cannot be trimmed this iteration
#[derive(Debug)]
pub struct ReplicaDiscovery {
    pub replica_ref: QueueRef,
    pub context: QueueResult<QueueTrimContext>,
}

pub struct TrimPlanner<'a> {
    directory: &'a dyn ClientDirectory,
    object_store: &'a dyn ObjectStore,
    logging_tag: &'a str,
}

impl<'a> TrimPlanner<'a> {
    pub fn new(
        directory: &'a dyn ClientDirectory,
        object_store: &'a dyn ObjectStore,
        logging_tag: &'a str,
    ) -> Self {
        Self {
            directory,
            object_store,
            logging_tag,
        }
    }

    /// Fails as a whole only when the topology itself cannot be resolved
    pub async fn get_replicas_to_trim(
        &self,
        snapshot: &Arc<QueueSnapshot>,
    ) -> QueueResult<Vec<ReplicaDiscovery>> {
        match snapshot.row.object_type {
            Some(ObjectType::Table) => Ok(vec![self.plain_table_replica(snapshot)]),
            Some(ObjectType::ReplicatedTable) => {
                Ok(self.replicated_table_replicas(mapping_row(snapshot)?))
            }
            Some(ObjectType::ChaosReplicatedTable) => {
                self.chaos_replicated_table_replicas(snapshot, mapping_row(snapshot)?)
                    .await
            }
            None => Err(QueueError::InvalidFamily {
                reason: format!("queue {} has no object type", snapshot.queue_ref()),
            }),
        }
    }

    fn plain_table_replica(&self, snapshot: &Arc<QueueSnapshot>) -> ReplicaDiscovery {
        let replica_ref = snapshot.queue_ref().clone();
        let context = self
            .directory
            .get_client(&replica_ref.cluster)
            .and_then(|client| QueueTrimContext::new(client, snapshot.clone()));
        ReplicaDiscovery {
            replica_ref,
            context,
        }
    }

    fn replica_context(&self, replica_ref: &QueueRef) -> QueueResult<QueueTrimContext> {
        let replica_snapshot = self
            .object_store
            .find_queue_snapshot(replica_ref)
            .ok_or_else(|| {
                QueueError::MissingSnapshot {
                    object: replica_ref.clone(),
                }
                .context("Trimming iteration skipped due to missing snapshot for queue replica")
            })?;
        let client = self.directory.get_client(&replica_ref.cluster)?;
        QueueTrimContext::new(client, replica_snapshot)
    }

    fn replicated_table_replicas(
        &self,
        mapping: &ReplicatedTableMappingRow,
    ) -> Vec<ReplicaDiscovery> {
        mapping
            .replica_refs()
            .into_iter()
            .map(|replica_ref| {
                let context = self.replica_context(&replica_ref).map(|mut context| {
                    context.cap_at_upper_row_index();
                    context
                });
                ReplicaDiscovery {
                    replica_ref,
                    context,
                }
            })
            .collect()
    }

    async fn chaos_replicated_table_replicas(
        &self,
        snapshot: &Arc<QueueSnapshot>,
        mapping: &ReplicatedTableMappingRow,
    ) -> QueueResult<Vec<ReplicaDiscovery>> {
        let card_id = mapping
            .replication_card_id
            .as_ref()
            .ok_or_else(|| QueueError::MissingData {
                message: format!(
                    "Replicated table mapping row of {} has no replication card id",
                    snapshot.queue_ref()
                ),
            })?;
        let federated_client = self
            .directory
            .get_federated_client(&mapping.relevant_clusters())?;
        let card = federated_client
            .get_replication_card(card_id)
            .await
            .map_err(|error| error.context(format!("Failed to fetch replication card {}", card_id)))?;

        // Every replica may only be trimmed up to what all replicas have replicated
        let partition_count = snapshot.partition_count;
        let mut min_timestamps: Vec<Option<Timestamp>> = vec![None; partition_count];
        let mut uncovered = vec![card.replicas.is_empty(); partition_count];
        for replica in &card.replicas {
            for partition_index in 0..partition_count {
                let key = partition_index as i64;
                match replica.progress.min_timestamp(key, key + 1) {
                    Some(timestamp) => {
                        let bound = &mut min_timestamps[partition_index];
                        *bound = Some(bound.map_or(timestamp, |current| current.min(timestamp)));
                    }
                    None => uncovered[partition_index] = true,
                }
            }
        }

        let replica_refs: Vec<QueueRef> = card
            .replicas
            .iter()
            .map(|replica| QueueRef::new(replica.cluster.clone(), replica.replica_path.clone()))
            .collect();

        let discoveries = replica_refs.iter().map(|replica_ref| {
            let context = self.replica_context(replica_ref);
            let min_timestamps = &min_timestamps;
            let uncovered = &uncovered;
            async move {
                let mut context = context?;
                let mut requests = Vec::new();
                for partition in context.partition_contexts.iter_mut() {
                    let index = partition.partition_index;
                    match min_timestamps.get(index).copied().flatten() {
                        Some(timestamp) if !uncovered[index] => {
                            requests.push(SafeTrimRowCountRequest {
                                path: context.object_path.clone(),
                                tablet_index: index,
                                timestamp,
                            });
                        }
                        _ => partition.set_error(QueueError::MissingData {
                            message: format!(
                                "Replication progress does not cover partition {}",
                                index
                            ),
                        }),
                    }
                }
                if requests.is_empty() {
                    return Ok(context);
                }

                let safe_trim_row_counts = context
                    .client
                    .get_ordered_tablet_safe_trim_row_count(&requests)
                    .await
                    .map_err(|error| {
                        error.context(format!(
                            "Failed to get safe trim row counts for replica {}",
                            context.replica_ref
                        ))
                    })?;
                for (request, result) in requests.iter().zip(safe_trim_row_counts) {
                    let partition = &mut context.partition_contexts[request.tablet_index];
                    match result {
                        Ok(safe_trim_row_count) => partition
                            .update(&PartitionTrimContext::new(request.tablet_index).with_max(safe_trim_row_count)),
                        Err(error) => partition.set_error(error),
                    }
                }
                Ok(context)
            }
        });
        let contexts = join_all(discoveries).await;

        debug!(
            "Chaos replicas discovered (ReplicationCard: {}, Replicas: {}, {})",
            card_id,
            replica_refs.len(),
            self.logging_tag
        );

        Ok(replica_refs
            .into_iter()
            .zip(contexts)
            .map(|(replica_ref, context)| ReplicaDiscovery {
                replica_ref,
                context,
            })
            .collect())
    }
}

fn mapping_row(snapshot: &QueueSnapshot) -> QueueResult<&ReplicatedTableMappingRow> {
    snapshot
        .replicated_table_mapping_row
        .as_ref()
        .ok_or_else(|| QueueError::MissingData {
            message: format!(
                "Replicated table mapping row is missing for queue {}",
                snapshot.queue_ref()
            ),
        })
}
