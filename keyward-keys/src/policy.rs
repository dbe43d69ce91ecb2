//! Rotation due-date policy

use chrono::{DateTime, Duration, Utc};

/// Rotation schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub interval_hours: u32,
}

impl RotationPolicy {
    pub fn new(interval_hours: u32) -> Self {
        Self { interval_hours }
    }

    pub fn is_due(&self, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        is_due(last_success, now, self.interval_hours)
    }

    pub fn next_due(&self, last_success: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        next_due(last_success, self.interval_hours)
    }
}

/// Whether a rotation is due
///
/// With no recorded success the key has never been rotated and rotation is
/// always due.
pub fn is_due(last_success: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_hours: u32) -> bool {
    match next_due(last_success, interval_hours) {
        None => true,
        Some(due_at) => now >= due_at,
    }
}

/// Instant at which the next rotation becomes due, `None` when no success exists yet
pub fn next_due(last_success: Option<DateTime<Utc>>, interval_hours: u32) -> Option<DateTime<Utc>> {
    last_success.map(|last| last + Duration::hours(i64::from(interval_hours)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_bootstrap_is_always_due() {
        assert!(is_due(None, t0(), 24));
        assert!(is_due(None, Utc.timestamp_opt(0, 0).unwrap(), 1));
        assert!(is_due(None, t0() + Duration::days(10_000), u32::MAX));
    }

    #[test]
    fn test_due_boundary() {
        for hours in [1u32, 24, 168] {
            let last = t0();
            let interval = Duration::hours(i64::from(hours));
            assert!(!is_due(Some(last), last + interval - Duration::milliseconds(1), hours));
            assert!(is_due(Some(last), last + interval, hours));
            assert!(is_due(Some(last), last + interval + Duration::seconds(1), hours));
        }
    }

    #[test]
    fn test_clock_behind_last_success_is_not_due() {
        assert!(!is_due(Some(t0()), t0() - Duration::hours(3), 1));
    }

    #[test]
    fn test_next_due() {
        let policy = RotationPolicy::new(24);
        assert_eq!(policy.next_due(None), None);
        assert_eq!(policy.next_due(Some(t0())), Some(t0() + Duration::hours(24)));
    }
}
