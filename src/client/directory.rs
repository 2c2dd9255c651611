//! Resolution of clusters to storage clients

use crate::client::storage::StorageClient;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::types::{ObjectType, QueueTableRow, ReplicatedTableMappingRow};
use std::sync::Arc;

/// A client together with the path it should be addressed with
#[derive(Clone)]
pub struct ClientContext {
    pub client: Arc<dyn StorageClient>,
    pub path: String,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("cluster", &self.client.cluster())
            .field("path", &self.path)
            .finish()
    }
}

pub trait ClientDirectory: Send + Sync {
    fn get_client(&self, cluster: &str) -> QueueResult<Arc<dyn StorageClient>>;

    /// Client able to reach metadata shared by all of `clusters`
    fn get_federated_client(&self, clusters: &[String]) -> QueueResult<Arc<dyn StorageClient>>;

    /// Client and path holding the queue's live tablets
    ///
    /// Plain and replicated tables are read directly; chaos-replicated tables
    /// have no data of their own and are read through a synchronous replica.
    fn get_native_sync_client(
        &self,
        row: &QueueTableRow,
        mapping: Option<&ReplicatedTableMappingRow>,
    ) -> QueueResult<ClientContext> {
        match row.object_type {
            Some(ObjectType::ChaosReplicatedTable) => {
                let mapping = mapping.ok_or_else(|| QueueError::MissingData {
                    message: format!(
                        "Replicated table mapping row is missing for queue {}",
                        row.queue_ref
                    ),
                })?;
                let replica = mapping.sync_replica().ok_or_else(|| QueueError::MissingData {
                    message: format!("No sync replicas found for queue {}", row.queue_ref),
                })?;
                Ok(ClientContext {
                    client: self.get_client(&replica.cluster)?,
                    path: replica.path.clone(),
                })
            }
            _ => Ok(ClientContext {
                client: self.get_client(&row.queue_ref.cluster)?,
                path: row.queue_ref.path.clone(),
            }),
        }
    }

    /// Client and path to read row data from
    fn get_data_read_context(
        &self,
        row: &QueueTableRow,
        mapping: Option<&ReplicatedTableMappingRow>,
    ) -> QueueResult<ClientContext> {
        self.get_native_sync_client(row, mapping)
    }
}
