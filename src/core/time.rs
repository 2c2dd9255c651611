//! Time provider abstraction and cluster timestamp helpers

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Cluster timestamp: unix seconds in the upper bits, a per-second counter in the lower bits
pub type Timestamp = u64;

/// Width of the per-second counter part of a timestamp
pub const TIMESTAMP_COUNTER_WIDTH: u32 = 30;

/// Instant at the start of the second containing `timestamp`
pub fn timestamp_to_instant(timestamp: Timestamp) -> DateTime<Utc> {
    let seconds = (timestamp >> TIMESTAMP_COUNTER_WIDTH) as i64;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Smallest timestamp of the second containing `instant`
///
/// Rows whose commit timestamp is below the result were committed strictly
/// before `instant`'s second started.
pub fn instant_to_timestamp(instant: DateTime<Utc>) -> Timestamp {
    let seconds = instant.timestamp().max(0) as u64;
    seconds << TIMESTAMP_COUNTER_WIDTH
}

/// Abstraction over wall-clock time for testable time-dependent logic
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production time provider using actual system time
#[derive(Default, Clone)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced time provider for deterministic tests and dry runs
#[derive(Clone)]
pub struct MockTimeProvider {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for MockTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTimeProvider {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(instant: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn advance_time(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    pub fn set_time(&self, instant: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }
}

impl TimeProvider for MockTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serde adapter for `Duration` fields stored as integer milliseconds
pub mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde adapter for `Option<Duration>` fields stored as integer milliseconds
pub mod serde_opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider;
        let first = provider.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(provider.now() > first);
    }

    #[test]
    fn test_mock_time_provider() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let provider = MockTimeProvider::starting_at(start);

        provider.advance_time(Duration::from_secs(10));
        assert_eq!(provider.now(), start + chrono::Duration::seconds(10));

        provider.set_time(start);
        assert_eq!(provider.now(), start);
    }

    #[test]
    fn test_timestamp_conversion_uses_second_boundaries() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let timestamp = instant_to_timestamp(instant);

        assert_eq!(timestamp & ((1 << TIMESTAMP_COUNTER_WIDTH) - 1), 0);
        assert_eq!(timestamp_to_instant(timestamp), instant);
        // The counter part does not move the instant
        assert_eq!(timestamp_to_instant(timestamp + 12345), instant);

        let later = instant + chrono::Duration::milliseconds(999);
        assert_eq!(instant_to_timestamp(later), timestamp);
    }
}
