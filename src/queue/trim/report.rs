//! Outcome of one trimming iteration, rendered in the orchid

use crate::core::time::Timestamp;
use crate::queue::error::{ErrorScope, QueueError};
use crate::queue::trim::context::QueueTrimContext;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionTrimOutcome {
    pub partition_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// New trimmed row count, present when a trim request succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trimmed_row_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicaTrimOutcome {
    pub replica: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_scope: Option<ErrorScope>,
    pub partitions: Vec<PartitionTrimOutcome>,
}

impl ReplicaTrimOutcome {
    pub fn failed(replica: String, error: &QueueError) -> Self {
        Self {
            replica,
            error: Some(error.to_string()),
            error_scope: Some(error.scope()),
            partitions: Vec::new(),
        }
    }

    /// Per-partition outcome from the final state of a session's contexts
    pub fn from_context(context: &QueueTrimContext, trimmed: &[(usize, i64)]) -> Self {
        let partitions = context
            .partition_contexts
            .iter()
            .map(|partition| PartitionTrimOutcome {
                partition_index: partition.partition_index,
                error: partition.partition_error.as_ref().map(ToString::to_string),
                trimmed_row_count: trimmed
                    .iter()
                    .find(|(index, _)| *index == partition.partition_index)
                    .filter(|_| partition.is_ok())
                    .map(|(_, count)| *count),
            })
            .collect();
        Self {
            replica: context.replica_ref.to_string(),
            error: None,
            error_scope: None,
            partitions,
        }
    }

    pub fn trimmed_partition_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|partition| partition.trimmed_row_count.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrimReport {
    pub pass_index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Reason the whole iteration was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub replicas: Vec<ReplicaTrimOutcome>,
}

impl TrimReport {
    pub fn skipped(pass_index: i64, error: &QueueError) -> Self {
        Self {
            pass_index,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn replica(&self, replica: &str) -> Option<&ReplicaTrimOutcome> {
        self.replicas.iter().find(|outcome| outcome.replica == replica)
    }
}
