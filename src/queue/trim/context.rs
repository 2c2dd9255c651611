//! Per-partition trim constraints and their merge rule

use crate::client::storage::StorageClient;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::snapshot::QueueSnapshot;
use crate::queue::types::QueueRef;
use std::fmt;
use std::sync::Arc;

/// Constraints collected for one partition of one replica
///
/// `min_trimmed_row_count` is a floor every source agrees may be trimmed,
/// `max_trimmed_row_count` a ceiling no source allows going past. Unset
/// values are the most permissive for their side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionTrimContext {
    pub partition_index: usize,
    pub partition_error: Option<QueueError>,
    pub min_trimmed_row_count: Option<i64>,
    pub max_trimmed_row_count: Option<i64>,
}

impl PartitionTrimContext {
    pub fn new(partition_index: usize) -> Self {
        Self {
            partition_index,
            ..Default::default()
        }
    }

    pub fn with_min(mut self, min_trimmed_row_count: i64) -> Self {
        self.min_trimmed_row_count = Some(min_trimmed_row_count);
        self
    }

    pub fn with_max(mut self, max_trimmed_row_count: i64) -> Self {
        self.max_trimmed_row_count = Some(max_trimmed_row_count);
        self
    }

    /// Whether the partition is still eligible for trimming
    pub fn is_ok(&self) -> bool {
        self.partition_error.is_none()
    }

    /// Record `error` unless one is already set; the first error wins
    pub fn set_error(&mut self, error: QueueError) {
        if self.partition_error.is_none() {
            self.partition_error = Some(error);
        }
    }

    /// Merge `other` into `self`: first error wins, floors take the maximum,
    /// ceilings take the minimum
    pub fn update(&mut self, other: &PartitionTrimContext) {
        if let Some(error) = &other.partition_error {
            self.set_error(error.clone());
        }
        self.min_trimmed_row_count = match (self.min_trimmed_row_count, other.min_trimmed_row_count) {
            (Some(current), Some(other)) => Some(current.max(other)),
            (current, other) => current.or(other),
        };
        self.max_trimmed_row_count = match (self.max_trimmed_row_count, other.max_trimmed_row_count) {
            (Some(current), Some(other)) => Some(current.min(other)),
            (current, other) => current.or(other),
        };
    }

    /// Trim target if it advances past `current_trimmed_row_count`
    ///
    /// The target is derived from the floor only and clamped by the ceiling.
    /// Without a floor nothing is trimmed.
    pub fn updated_trimmed_row_count(&self, current_trimmed_row_count: i64) -> Option<i64> {
        if !self.is_ok() {
            return None;
        }
        let min = self.min_trimmed_row_count?;
        let target = match self.max_trimmed_row_count {
            Some(max) => min.min(max),
            None => min,
        };
        (target > current_trimmed_row_count).then_some(target)
    }
}

/// Everything a trim session needs to know about one replica
#[derive(Clone)]
pub struct QueueTrimContext {
    pub replica_ref: QueueRef,
    /// `#<object id>` of the replica table
    pub object_path: String,
    pub client: Arc<dyn StorageClient>,
    pub replica_snapshot: Arc<QueueSnapshot>,
    pub partition_contexts: Vec<PartitionTrimContext>,
}

impl fmt::Debug for QueueTrimContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTrimContext")
            .field("replica_ref", &self.replica_ref)
            .field("object_path", &self.object_path)
            .field("cluster", &self.client.cluster())
            .field("partition_contexts", &self.partition_contexts)
            .finish()
    }
}

impl QueueTrimContext {
    /// Context with one unconstrained partition entry per replica partition
    pub fn new(
        client: Arc<dyn StorageClient>,
        replica_snapshot: Arc<QueueSnapshot>,
    ) -> QueueResult<Self> {
        let replica_ref = replica_snapshot.queue_ref().clone();
        let object_id = replica_snapshot
            .row
            .object_id
            .as_ref()
            .ok_or_else(|| QueueError::MissingData {
                message: format!("Queue {} has no object id", replica_ref),
            })?;
        let partition_contexts = (0..replica_snapshot.partition_count)
            .map(PartitionTrimContext::new)
            .collect();
        Ok(Self {
            replica_ref,
            object_path: format!("#{}", object_id),
            client,
            replica_snapshot,
            partition_contexts,
        })
    }

    /// Context sizes must agree with the replica snapshot
    pub fn validate(&self) -> QueueResult<()> {
        let snapshot = &self.replica_snapshot;
        if snapshot.partition_count != snapshot.partition_snapshots.len() {
            return Err(QueueError::MissingData {
                message: format!(
                    "Partition count {} of replica {} does not match its {} partition snapshots",
                    snapshot.partition_count,
                    self.replica_ref,
                    snapshot.partition_snapshots.len()
                ),
            });
        }
        if self.partition_contexts.len() != snapshot.partition_count {
            return Err(QueueError::MissingData {
                message: format!(
                    "Replica {} has {} partitions but {} trim contexts",
                    self.replica_ref,
                    snapshot.partition_count,
                    self.partition_contexts.len()
                ),
            });
        }
        for (index, context) in self.partition_contexts.iter().enumerate() {
            if context.partition_index != index {
                return Err(QueueError::MissingData {
                    message: format!(
                        "Trim context {} of replica {} refers to partition {}",
                        index, self.replica_ref, context.partition_index
                    ),
                });
            }
        }
        Ok(())
    }

    /// Tighten every partition's ceiling to the replica's own upper row index
    pub fn cap_at_upper_row_index(&mut self) {
        for (context, partition) in self
            .partition_contexts
            .iter_mut()
            .zip(&self.replica_snapshot.partition_snapshots)
        {
            context.update(&PartitionTrimContext::new(context.partition_index).with_max(partition.upper_row_index));
        }
    }

    pub fn partition_errors(&self) -> impl Iterator<Item = (usize, &QueueError)> {
        self.partition_contexts.iter().filter_map(|context| {
            context
                .partition_error
                .as_ref()
                .map(|error| (context.partition_index, error))
        })
    }
}
