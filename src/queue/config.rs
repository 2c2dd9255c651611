//! Hot-reloadable controller tunables

use crate::core::time::{serde_millis, serde_opt_millis};
use crate::queue::error::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PASS_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueControllerDynamicConfig {
    #[serde(rename = "pass_period_ms", with = "serde_millis")]
    pub pass_period: Duration,

    /// Stored for the export pipeline, which this agent does not run
    #[serde(
        rename = "export_period_ms",
        with = "serde_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub export_period: Option<Duration>,

    pub enable_automatic_trimming: bool,

    /// Defaults to the pass period
    #[serde(
        rename = "trimming_period_ms",
        with = "serde_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub trimming_period: Option<Duration>,
}

impl Default for QueueControllerDynamicConfig {
    fn default() -> Self {
        Self {
            pass_period: DEFAULT_PASS_PERIOD,
            export_period: None,
            enable_automatic_trimming: false,
            trimming_period: None,
        }
    }
}

impl QueueControllerDynamicConfig {
    pub fn validate(&self) -> QueueResult<()> {
        if self.pass_period.is_zero() {
            return Err(QueueError::Configuration {
                message: "pass_period_ms must be positive".to_string(),
            });
        }
        if self.trimming_period.is_some_and(|period| period.is_zero()) {
            return Err(QueueError::Configuration {
                message: "trimming_period_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Trimming runs on passes whose index is a multiple of this value
    pub fn trimming_frequency(&self) -> i64 {
        let pass_period = self.pass_period.as_micros();
        if pass_period == 0 {
            return 1;
        }
        let trimming_period = self.trimming_period.unwrap_or(self.pass_period).as_micros();
        (trimming_period.div_ceil(pass_period) as i64).max(1)
    }
}
