//! Introspection tree of a queue
//!
//! Rendered from already published state only; building an orchid never
//! performs I/O.

use crate::queue::error::QueueError;
use crate::queue::snapshot::{PartitionSnapshot, QueueSnapshot};
use crate::queue::trim::report::TrimReport;
use crate::queue::types::{QueueTableRow, ReplicatedTableMappingRow};
use serde_json::{json, Map, Value};

pub fn build_queue_orchid(
    snapshot: &QueueSnapshot,
    leading: bool,
    trim_report: Option<&TrimReport>,
) -> Value {
    let mut orchid = json!({
        "leading": leading,
        "pass_index": snapshot.pass_index,
        "pass_instant": snapshot.pass_instant.to_rfc3339(),
        "row": snapshot.row,
        "replicated_table_mapping_row": snapshot.replicated_table_mapping_row,
        "status": build_queue_status(snapshot),
        "partitions": build_queue_partition_list(snapshot),
    });
    if let (Some(report), Value::Object(map)) = (trim_report, &mut orchid) {
        map.insert("trim".to_string(), json!(report));
    }
    orchid
}

/// Orchid of a queue that cannot be processed at all
pub fn build_error_orchid(
    row: &QueueTableRow,
    replicated_table_mapping_row: Option<&ReplicatedTableMappingRow>,
    error: &QueueError,
) -> Value {
    json!({
        "row": row,
        "replicated_table_mapping_row": replicated_table_mapping_row,
        "status": { "error": error.to_string() },
        "partitions": [],
    })
}

pub fn build_queue_status(snapshot: &QueueSnapshot) -> Value {
    if let Some(error) = &snapshot.error {
        return json!({ "error": error.to_string() });
    }
    json!({
        "family": snapshot.family,
        "partition_count": snapshot.partition_count,
        "has_timestamp_column": snapshot.has_timestamp_column,
        "has_cumulative_data_weight_column": snapshot.has_cumulative_data_weight_column,
        "write_row_count_rate": snapshot.write_rate.row_count.rate_summary(),
        "write_data_weight_rate": snapshot.write_rate.data_weight.rate_summary(),
        "registrations": snapshot.registrations,
    })
}

pub fn build_queue_partition_list(snapshot: &QueueSnapshot) -> Value {
    Value::Array(
        snapshot
            .partition_snapshots
            .iter()
            .map(build_partition)
            .collect(),
    )
}

fn build_partition(partition: &PartitionSnapshot) -> Value {
    if let Some(error) = &partition.error {
        return json!({
            "tablet_state": partition.tablet_state,
            "error": error.to_string(),
        });
    }

    let mut map = Map::new();
    map.insert("tablet_state".into(), json!(partition.tablet_state));
    map.insert("lower_row_index".into(), json!(partition.lower_row_index));
    map.insert("upper_row_index".into(), json!(partition.upper_row_index));
    map.insert("available_row_count".into(), json!(partition.available_row_count));
    map.insert(
        "last_row_commit_time".into(),
        json!(partition.last_row_commit_time.map(|time| time.to_rfc3339())),
    );
    map.insert(
        "commit_idle_time_ms".into(),
        json!(partition.commit_idle_time.map(|idle| idle.as_millis() as u64)),
    );
    map.insert("trimmed_data_weight".into(), json!(partition.trimmed_data_weight));
    map.insert("cumulative_data_weight".into(), json!(partition.cumulative_data_weight));
    map.insert("available_data_weight".into(), json!(partition.available_data_weight));
    map.insert(
        "write_row_count_rate".into(),
        json!(partition.write_rate.row_count.rate_summary()),
    );
    map.insert(
        "write_data_weight_rate".into(),
        json!(partition.write_rate.data_weight.rate_summary()),
    );
    map.insert("meta".into(), json!(partition.meta));
    Value::Object(map)
}
