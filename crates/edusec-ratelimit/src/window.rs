//! Sliding window arithmetic over request timestamps

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Rate-limit horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    Hour,
    Day,
    Week,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Hour, Horizon::Day, Horizon::Week];

    pub fn window(self) -> Duration {
        match self {
            Horizon::Hour => Duration::hours(1),
            Horizon::Day => Duration::days(1),
            Horizon::Week => Duration::weeks(1),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Horizon::Hour => "Hourly",
            Horizon::Day => "Daily",
            Horizon::Week => "Weekly",
        }
    }
}

/// Requests inside one trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: usize,
    pub oldest: Option<DateTime<Utc>>,
}

/// Count timestamps strictly after `start`. `times` must be ascending.
pub fn count_after(times: &[DateTime<Utc>], start: DateTime<Utc>) -> WindowCount {
    let first = times.partition_point(|t| *t <= start);
    WindowCount {
        count: times.len() - first,
        oldest: times.get(first).copied(),
    }
}

/// Window start honoring an optional reset boundary
pub fn window_start(now: DateTime<Utc>, window: Duration, reset_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let start = now - window;
    match reset_at {
        Some(boundary) if boundary > start => boundary,
        _ => start,
    }
}

/// Whole seconds until `oldest` leaves the window, at least 1
pub fn seconds_until_expiry(oldest: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> u64 {
    let millis = (oldest + window - now).num_milliseconds();
    let secs = (millis + 999).div_euclid(1000);
    secs.max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_after_is_exclusive() {
        let now = Utc::now();
        let times = vec![
            now - Duration::minutes(90),
            now - Duration::minutes(60),
            now - Duration::minutes(30),
            now - Duration::minutes(1),
        ];
        let hour = count_after(&times, now - Duration::hours(1));
        assert_eq!(hour.count, 2);
        assert_eq!(hour.oldest, Some(times[2]));

        let none = count_after(&times, now);
        assert_eq!(none.count, 0);
        assert_eq!(none.oldest, None);
    }

    #[test]
    fn test_reset_boundary_narrows_window() {
        let now = Utc::now();
        let reset = now - Duration::minutes(10);
        assert_eq!(window_start(now, Duration::hours(1), Some(reset)), reset);
        assert_eq!(
            window_start(now, Duration::minutes(5), Some(reset)),
            now - Duration::minutes(5)
        );
    }

    #[test]
    fn test_expiry_rounds_up_and_floors_at_one() {
        let now = Utc::now();
        let oldest = now - Duration::minutes(50);
        assert_eq!(seconds_until_expiry(oldest, Duration::hours(1), now), 600);

        let almost = now - Duration::hours(1) + Duration::milliseconds(200);
        assert_eq!(seconds_until_expiry(almost, Duration::hours(1), now), 1);
        assert_eq!(seconds_until_expiry(now - Duration::hours(2), Duration::hours(1), now), 1);
    }
}
