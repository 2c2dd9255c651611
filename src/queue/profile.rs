//! Pass-over-pass activity of a queue

use crate::queue::snapshot::QueueSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueProfileDelta {
    pub rows_written: i64,
    pub rows_trimmed: i64,
    pub data_weight_written: i64,
}

impl QueueProfileDelta {
    /// Compare partitions that are healthy in both snapshots
    ///
    /// Partitions missing from either side, or whose counters went backwards
    /// (the table was recreated), do not contribute.
    pub fn between(previous: &QueueSnapshot, next: &QueueSnapshot) -> Self {
        let mut delta = Self::default();
        if !previous.is_ok() || !next.is_ok() {
            return delta;
        }
        for (before, after) in previous
            .partition_snapshots
            .iter()
            .zip(&next.partition_snapshots)
        {
            if !before.is_ok() || !after.is_ok() {
                continue;
            }
            delta.rows_written += (after.upper_row_index - before.upper_row_index).max(0);
            delta.rows_trimmed += (after.lower_row_index - before.lower_row_index).max(0);
            if let (Some(before), Some(after)) =
                (before.cumulative_data_weight, after.cumulative_data_weight)
            {
                delta.data_weight_written += (after - before).max(0);
            }
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
