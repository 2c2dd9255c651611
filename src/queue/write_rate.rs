//! Exponential moving average rate estimation
//!
//! Counters are monotonic totals (row count, cumulative data weight); each
//! update turns the delta since the previous observation into a per-second
//! rate and folds it into one average per window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::AddAssign;
use std::time::Duration;

/// Averaging windows: one minute, one hour, one day
pub const RATE_WINDOWS: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(24 * 60 * 60),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmaCounter {
    last_value: Option<i64>,
    last_instant: Option<DateTime<Utc>>,
    /// Rate observed between the last two updates
    immediate_rate: f64,
    /// One average per entry of `RATE_WINDOWS`
    window_rates: [f64; 3],
    initialized: bool,
}

impl EmaCounter {
    pub fn update(&mut self, value: i64, now: DateTime<Utc>) {
        if let (Some(last_value), Some(last_instant)) = (self.last_value, self.last_instant) {
            let elapsed = (now - last_instant).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 {
                let delta = (value - last_value).max(0) as f64;
                self.immediate_rate = delta / elapsed;
                for (rate, window) in self.window_rates.iter_mut().zip(RATE_WINDOWS) {
                    if self.initialized {
                        let alpha = 1.0 - (-elapsed / window.as_secs_f64()).exp();
                        *rate += alpha * (self.immediate_rate - *rate);
                    } else {
                        *rate = self.immediate_rate;
                    }
                }
                self.initialized = true;
            }
        }
        self.last_value = Some(value);
        self.last_instant = Some(now);
    }

    pub fn last_value(&self) -> Option<i64> {
        self.last_value
    }

    pub fn immediate_rate(&self) -> f64 {
        self.immediate_rate
    }

    pub fn window_rates(&self) -> [f64; 3] {
        self.window_rates
    }

    pub fn rate_summary(&self) -> RateSummary {
        RateSummary {
            current: self.immediate_rate,
            one_minute_raw: self.window_rates[0],
            one_hour: self.window_rates[1],
            one_day: self.window_rates[2],
        }
    }
}

impl AddAssign<&EmaCounter> for EmaCounter {
    /// Sum rates; observation state of `self` is left untouched
    fn add_assign(&mut self, other: &EmaCounter) {
        self.immediate_rate += other.immediate_rate;
        for (rate, other_rate) in self.window_rates.iter_mut().zip(other.window_rates) {
            *rate += other_rate;
        }
        self.initialized |= other.initialized;
    }
}

/// Rendered form of an `EmaCounter`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSummary {
    pub current: f64,
    #[serde(rename = "1m_raw")]
    pub one_minute_raw: f64,
    #[serde(rename = "1h")]
    pub one_hour: f64,
    #[serde(rename = "1d")]
    pub one_day: f64,
}

/// Rows per second and bytes per second of a partition or queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteRate {
    pub row_count: EmaCounter,
    pub data_weight: EmaCounter,
}

impl AddAssign<&WriteRate> for WriteRate {
    fn add_assign(&mut self, other: &WriteRate) {
        self.row_count += &other.row_count;
        self.data_weight += &other.data_weight;
    }
}
