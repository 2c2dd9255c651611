//! Consumer-aware trimming
//!
//! One trimming iteration discovers the replicas of a queue, runs one
//! [`session::TrimSession`] per replica concurrently and waits for all of
//! them. A failing replica never cancels the others.

pub mod context;
pub mod planner;
pub mod report;
pub mod session;

use crate::client::directory::ClientDirectory;
use crate::client::object_store::ObjectStore;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::snapshot::QueueSnapshot;
use crate::queue::trim::planner::TrimPlanner;
use crate::queue::trim::report::{ReplicaTrimOutcome, TrimReport};
use crate::queue::trim::session::TrimSession;
use futures::future::join_all;
use log::{debug, error};
use std::sync::Arc;

pub use context::{PartitionTrimContext, QueueTrimContext};
pub use report::PartitionTrimOutcome;

/// Run one trimming iteration for the queue described by `snapshot`
pub async fn run_trimming_iteration(
    snapshot: Arc<QueueSnapshot>,
    directory: &dyn ClientDirectory,
    object_store: &dyn ObjectStore,
    logging_tag: &str,
) -> TrimReport {
    match guarded_trim(snapshot.clone(), directory, object_store, logging_tag).await {
        Ok(report) => report,
        Err(trim_error) => {
            error!(
                "Error while trimming queue (Error: {}, {})",
                trim_error, logging_tag
            );
            TrimReport::skipped(snapshot.pass_index, &trim_error)
        }
    }
}

async fn guarded_trim(
    snapshot: Arc<QueueSnapshot>,
    directory: &dyn ClientDirectory,
    object_store: &dyn ObjectStore,
    logging_tag: &str,
) -> QueueResult<TrimReport> {
    if let Some(queue_error) = &snapshot.error {
        return Err(queue_error
            .clone()
            .context("Trimming iteration skipped due to queue error"));
    }

    let auto_trim_config = &snapshot.row.auto_trim_config;
    if !auto_trim_config.enable {
        debug!(
            "Trimming disabled; trimming iteration skipped (AutoTrimConfig: {:?}, {})",
            auto_trim_config, logging_tag
        );
        return Ok(TrimReport::skipped(
            snapshot.pass_index,
            &QueueError::trimming_skipped("trimming is disabled for this queue"),
        ));
    }

    let cluster = &snapshot.queue_ref().cluster;
    let current_timestamp = directory
        .get_client(cluster)?
        .generate_timestamp()
        .await
        .map_err(|timestamp_error| {
            timestamp_error.context(format!(
                "Cannot generate timestamp for cluster {:?}, trimming iteration skipped",
                cluster
            ))
        })?;

    let planner = TrimPlanner::new(directory, object_store, logging_tag);
    let discoveries = planner.get_replicas_to_trim(&snapshot).await?;

    let sessions = discoveries.into_iter().map(|discovery| {
        let snapshot = snapshot.clone();
        async move {
            let replica = discovery.replica_ref.to_string();
            let outcome = match discovery.context {
                Ok(context) => {
                    TrimSession::new(snapshot, context, current_timestamp, object_store, logging_tag)
                        .run()
                        .await
                }
                Err(discovery_error) => Err(discovery_error),
            };
            outcome.unwrap_or_else(|session_error| {
                debug!(
                    "Unable to trim queue replica due to error (Replica: {}, Error: {}, Scope: {}, {})",
                    replica,
                    session_error,
                    session_error.scope(),
                    logging_tag
                );
                ReplicaTrimOutcome::failed(replica, &session_error)
            })
        }
    });
    let replicas = join_all(sessions).await;

    debug!(
        "Trimming iteration finished (Replicas: {}, TrimmedPartitions: {}, {})",
        replicas.len(),
        replicas
            .iter()
            .map(ReplicaTrimOutcome::trimmed_partition_count)
            .sum::<usize>(),
        logging_tag
    );

    Ok(TrimReport {
        pass_index: snapshot.pass_index,
        timestamp: Some(current_timestamp),
        error: None,
        replicas,
    })
}
