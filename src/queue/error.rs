//! Queue Agent Error Types
//!
//! Errors are cloneable so that they can be stored inside immutable snapshots
//! and copied into per-partition trim contexts.

use crate::queue::types::{QueueRef, TabletState};
use std::sync::Arc;

/// How far the effect of an error reaches within one controller pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorScope {
    /// The whole pass output is an error snapshot, trimming is skipped
    Queue,
    /// Only one replica's trim session is aborted
    Replica,
    /// Only one partition is skipped
    Partition,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is not processed yet")]
    NotProcessedYet,

    #[error("Invalid queue schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("Invalid queue family: {reason}")]
    InvalidFamily { reason: String },

    #[error("Queue synchronization error: {message}")]
    Synchronization { message: String },

    #[error("Tablet {tablet_id} is not mounted or frozen (state: {state})")]
    TabletNotMounted { tablet_id: String, state: TabletState },

    #[error("Not trimming partition {partition_index} since its tablet is in state {state:?} and is not mounted")]
    PartitionNotMounted {
        partition_index: usize,
        state: TabletState,
    },

    #[error("Cluster {cluster:?} is not known to the client directory")]
    UnknownCluster { cluster: String },

    #[error("Table {path:?} is not found on cluster {cluster:?}")]
    TableNotFound { cluster: String, path: String },

    #[error("Storage request {operation:?} failed on cluster {cluster:?}: {message}")]
    Storage {
        cluster: String,
        operation: String,
        message: String,
    },

    #[error("Missing snapshot for {object}")]
    MissingSnapshot { object: QueueRef },

    #[error("Missing data: {message}")]
    MissingData { message: String },

    #[error("Trimming iteration skipped: {reason}")]
    TrimmingSkipped { reason: String },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Arc<QueueError>,
    },
}

impl QueueError {
    /// Wrap this error with an explanatory message
    pub fn context(self, message: impl Into<String>) -> Self {
        QueueError::Context {
            message: message.into(),
            source: Arc::new(self),
        }
    }

    pub fn storage(
        cluster: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        QueueError::Storage {
            cluster: cluster.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn trimming_skipped(reason: impl Into<String>) -> Self {
        QueueError::TrimmingSkipped {
            reason: reason.into(),
        }
    }

    /// Innermost error of a context chain
    pub fn root_cause(&self) -> &QueueError {
        match self {
            QueueError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Classify the error by the extent of its effect
    pub fn scope(&self) -> ErrorScope {
        match self.root_cause() {
            QueueError::NotProcessedYet
            | QueueError::InvalidSchema { .. }
            | QueueError::InvalidFamily { .. }
            | QueueError::Synchronization { .. }
            | QueueError::Configuration { .. } => ErrorScope::Queue,
            QueueError::TabletNotMounted { .. } | QueueError::PartitionNotMounted { .. } => {
                ErrorScope::Partition
            }
            QueueError::UnknownCluster { .. }
            | QueueError::TableNotFound { .. }
            | QueueError::Storage { .. }
            | QueueError::MissingSnapshot { .. }
            | QueueError::MissingData { .. }
            | QueueError::TrimmingSkipped { .. } => ErrorScope::Replica,
            QueueError::Context { .. } => ErrorScope::Replica,
        }
    }
}

/// Result type for queue agent operations
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_renders_outer_then_inner() {
        let error = QueueError::storage("hume", "trim_table", "connection refused")
            .context("Error occurred while executing trimming request for partition 3");

        assert_eq!(
            error.to_string(),
            "Error occurred while executing trimming request for partition 3: \
             Storage request \"trim_table\" failed on cluster \"hume\": connection refused"
        );
    }

    #[test]
    fn test_root_cause_and_scope() {
        let error = QueueError::InvalidSchema {
            reason: "table is sorted".to_string(),
        }
        .context("first")
        .context("second");

        assert!(matches!(error.root_cause(), QueueError::InvalidSchema { .. }));
        assert_eq!(error.scope(), ErrorScope::Queue);

        let partition_error = QueueError::PartitionNotMounted {
            partition_index: 1,
            state: TabletState::Unmounted,
        };
        assert_eq!(partition_error.scope(), ErrorScope::Partition);
        assert_eq!(
            QueueError::trimming_skipped("no vital consumers").scope(),
            ErrorScope::Replica
        );
    }

    #[test]
    fn test_errors_are_comparable_after_clone() {
        let error = QueueError::MissingSnapshot {
            object: QueueRef::new("hume", "//tmp/q"),
        };
        assert_eq!(error.clone(), error);
        assert_eq!(error.to_string(), "Missing snapshot for hume://tmp/q");
    }
}
