//! Queue Domain Types
//!
//! Rows read from the agent's dynamic state and the identities they refer to.

use crate::core::time::{serde_opt_millis, Timestamp};
use crate::queue::error::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Cross-cluster identity of a queue, consumer or replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueRef {
    pub cluster: String,
    pub path: String,
}

impl QueueRef {
    pub fn new(cluster: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for QueueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cluster, self.path)
    }
}

impl FromStr for QueueRef {
    type Err = String;

    /// Parse `<cluster>:<path>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((cluster, path)) if !cluster.is_empty() && !path.is_empty() => {
                Ok(QueueRef::new(cluster, path))
            }
            _ => Err(format!(
                "Invalid cross-cluster reference {:?}, expected <cluster>:<path>",
                s
            )),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectType {
    Table,
    ReplicatedTable,
    ChaosReplicatedTable,
}

impl ObjectType {
    pub fn is_replicated(self) -> bool {
        matches!(
            self,
            ObjectType::ReplicatedTable | ObjectType::ChaosReplicatedTable
        )
    }
}

/// Kind of object a registration is looked up by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Queue,
    Consumer,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TabletState {
    Mounted,
    Frozen,
    #[default]
    Unmounted,
    Mounting,
    Unmounting,
    Freezing,
    Unfreezing,
}

impl TabletState {
    /// Whether row counters of the tablet can be fetched
    pub fn is_readable(self) -> bool {
        matches!(self, TabletState::Mounted | TabletState::Frozen)
    }
}

/// Processing family of a queue; one controller implementation per family
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueFamily {
    #[default]
    Null,
    OrderedDynamicTable,
}

/// Automatic trimming settings of a queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTrimConfig {
    pub enable: bool,
    #[serde(
        rename = "retained_lifetime_duration_ms",
        with = "serde_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub retained_lifetime_duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained_rows: Option<i64>,
}

impl AutoTrimConfig {
    pub fn validate(&self) -> QueueResult<()> {
        match self.retained_rows {
            Some(retained_rows) if retained_rows < 0 => Err(QueueError::Configuration {
                message: format!("retained_rows must not be negative, got {}", retained_rows),
            }),
            _ => Ok(()),
        }
    }
}

/// Persisted configuration of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTableRow {
    #[serde(rename = "ref")]
    pub queue_ref: QueueRef,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub object_type: Option<ObjectType>,
    #[serde(default)]
    pub dynamic: Option<bool>,
    #[serde(default)]
    pub sorted: Option<bool>,
    #[serde(default)]
    pub auto_trim_config: AutoTrimConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_error: Option<String>,
}

impl QueueTableRow {
    /// Row for an ordered dynamic table with trimming disabled
    pub fn ordered_table(queue_ref: QueueRef, object_id: impl Into<String>) -> Self {
        Self {
            queue_ref,
            object_id: Some(object_id.into()),
            object_type: Some(ObjectType::Table),
            dynamic: Some(true),
            sorted: Some(false),
            auto_trim_config: AutoTrimConfig::default(),
            synchronization_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaMode {
    #[default]
    Sync,
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub cluster: String,
    pub path: String,
    #[serde(default)]
    pub mode: ReplicaMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ReplicaDescriptor {
    pub fn replica_ref(&self) -> QueueRef {
        QueueRef::new(self.cluster.clone(), self.path.clone())
    }
}

/// Replica layout of a replicated or chaos-replicated queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedTableMappingRow {
    #[serde(rename = "ref")]
    pub queue_ref: QueueRef,
    #[serde(default)]
    pub object_type: Option<ObjectType>,
    #[serde(default)]
    pub replicas: Vec<ReplicaDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_card_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_error: Option<String>,
}

impl ReplicatedTableMappingRow {
    pub fn replica_refs(&self) -> Vec<QueueRef> {
        self.replicas.iter().map(ReplicaDescriptor::replica_ref).collect()
    }

    /// Distinct clusters hosting at least one replica, in listing order
    pub fn relevant_clusters(&self) -> Vec<String> {
        let mut clusters: Vec<String> = Vec::new();
        for replica in &self.replicas {
            if !clusters.contains(&replica.cluster) {
                clusters.push(replica.cluster.clone());
            }
        }
        clusters
    }

    /// First enabled synchronous replica
    pub fn sync_replica(&self) -> Option<&ReplicaDescriptor> {
        self.replicas
            .iter()
            .find(|replica| replica.enabled && replica.mode == ReplicaMode::Sync)
    }
}

/// A consumer's subscription to a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerRegistrationRow {
    pub queue: QueueRef,
    pub consumer: QueueRef,
    #[serde(default)]
    pub vital: bool,
}

/// One progress segment: partitions starting at `lower_key` are replicated up to `timestamp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSegment {
    pub lower_key: i64,
    pub timestamp: Timestamp,
}

/// Replication progress of one chaos replica over the partition key space
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationProgress {
    pub segments: Vec<ProgressSegment>,
    pub upper_key: i64,
}

impl ReplicationProgress {
    /// Minimum timestamp over all segments overlapping `[lower, upper)`;
    /// `None` when the range is not covered by the progress at all
    pub fn min_timestamp(&self, lower: i64, upper: i64) -> Option<Timestamp> {
        let mut result: Option<Timestamp> = None;
        for (index, segment) in self.segments.iter().enumerate() {
            let segment_upper = self
                .segments
                .get(index + 1)
                .map_or(self.upper_key, |next| next.lower_key);
            if segment.lower_key < upper && lower < segment_upper {
                result = Some(result.map_or(segment.timestamp, |ts| ts.min(segment.timestamp)));
            }
        }
        result
    }
}
