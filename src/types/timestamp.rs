//! Wall-clock timestamps with microsecond resolution

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self(i64::try_from(after.as_micros()).unwrap_or(i64::MAX)),
            Err(before) => Self(-i64::try_from(before.duration().as_micros()).unwrap_or(i64::MAX)),
        }
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        let delta = self.0.saturating_sub(earlier.0);
        Duration::from_micros(u64::try_from(delta).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_round_trip() {
        let time = UNIX_EPOCH + Duration::from_micros(1_571_234_567_890_123);
        assert_eq!(Timestamp::from_system_time(time).as_micros(), 1_571_234_567_890_123);
    }

    #[test]
    fn pre_epoch_is_negative() {
        let time = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(Timestamp::from_system_time(time).as_micros(), -1_000_000);
    }

    #[test]
    fn saturating_since_never_underflows() {
        let a = Timestamp::from_micros(10);
        let b = Timestamp::from_micros(25);
        assert_eq!(b.saturating_since(a), Duration::from_micros(15));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
    }
}
