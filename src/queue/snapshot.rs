//! Immutable per-pass views of queues and consumers
//!
//! A snapshot is built once per pass, wrapped in an `Arc` and published by an
//! atomic pointer swap. Nothing mutates a snapshot after publication.

use crate::queue::error::QueueError;
use crate::queue::types::{
    ConsumerRegistrationRow, QueueFamily, QueueRef, QueueTableRow, ReplicatedTableMappingRow,
    TabletState,
};
use crate::queue::write_rate::WriteRate;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Routing information of a partition's tablet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionMeta {
    pub cell_id: String,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionSnapshot {
    pub tablet_state: TabletState,
    pub error: Option<QueueError>,

    pub lower_row_index: i64,
    pub upper_row_index: i64,
    pub available_row_count: i64,

    pub last_row_commit_time: Option<DateTime<Utc>>,
    pub commit_idle_time: Option<Duration>,

    pub write_rate: WriteRate,

    pub trimmed_data_weight: Option<i64>,
    pub cumulative_data_weight: Option<i64>,
    pub available_data_weight: Option<i64>,

    pub meta: Option<PartitionMeta>,
}

impl PartitionSnapshot {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub pass_index: i64,
    pub pass_instant: DateTime<Utc>,

    pub row: QueueTableRow,
    pub replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,

    pub family: QueueFamily,
    pub partition_count: usize,
    pub partition_snapshots: Vec<PartitionSnapshot>,

    pub has_timestamp_column: bool,
    pub has_cumulative_data_weight_column: bool,

    pub write_rate: WriteRate,

    pub registrations: Vec<ConsumerRegistrationRow>,

    /// Queue-level failure of the pass that built this snapshot
    pub error: Option<QueueError>,
}

impl QueueSnapshot {
    /// Empty snapshot for `row` carrying `error`, used before the first pass
    /// and by controllers of queues that cannot be processed
    pub fn erroneous(
        row: QueueTableRow,
        replicated_table_mapping_row: Option<ReplicatedTableMappingRow>,
        error: QueueError,
    ) -> Self {
        Self {
            pass_index: 0,
            pass_instant: DateTime::<Utc>::UNIX_EPOCH,
            row,
            replicated_table_mapping_row,
            family: QueueFamily::Null,
            partition_count: 0,
            partition_snapshots: Vec::new(),
            has_timestamp_column: false,
            has_cumulative_data_weight_column: false,
            write_rate: WriteRate::default(),
            registrations: Vec::new(),
            error: Some(error),
        }
    }

    pub fn queue_ref(&self) -> &QueueRef {
        &self.row.queue_ref
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A consumer's progress in one partition of a queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerPartitionSnapshot {
    /// Offset the consumer has consumed up to
    pub next_row_index: i64,
    pub error: Option<QueueError>,
}

/// A consumer's view of one of the queues it reads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubConsumerSnapshot {
    pub partition_snapshots: Vec<ConsumerPartitionSnapshot>,
}

impl SubConsumerSnapshot {
    pub fn from_offsets(offsets: &[i64]) -> Self {
        Self {
            partition_snapshots: offsets
                .iter()
                .map(|&next_row_index| ConsumerPartitionSnapshot {
                    next_row_index,
                    error: None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSnapshot {
    pub consumer_ref: QueueRef,
    pub error: Option<QueueError>,
    pub sub_snapshots: HashMap<QueueRef, Arc<SubConsumerSnapshot>>,
}

impl ConsumerSnapshot {
    pub fn new(consumer_ref: QueueRef) -> Self {
        Self {
            consumer_ref,
            error: None,
            sub_snapshots: HashMap::new(),
        }
    }

    pub fn with_sub_snapshot(mut self, queue: QueueRef, sub_snapshot: SubConsumerSnapshot) -> Self {
        self.sub_snapshots.insert(queue, Arc::new(sub_snapshot));
        self
    }
}

/// Latest published snapshot of any object tracked by the object store
#[derive(Debug, Clone)]
pub enum ObjectSnapshot {
    Queue(Arc<QueueSnapshot>),
    Consumer(Arc<ConsumerSnapshot>),
}

impl ObjectSnapshot {
    pub fn as_queue(&self) -> Option<&Arc<QueueSnapshot>> {
        match self {
            ObjectSnapshot::Queue(snapshot) => Some(snapshot),
            ObjectSnapshot::Consumer(_) => None,
        }
    }

    pub fn as_consumer(&self) -> Option<&Arc<ConsumerSnapshot>> {
        match self {
            ObjectSnapshot::Consumer(snapshot) => Some(snapshot),
            ObjectSnapshot::Queue(_) => None,
        }
    }
}
