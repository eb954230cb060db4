// Time bucket and phenomenon-time value types
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;

/// Half-open interval `[start, end)` produced by the bucketing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBucket {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

/// Phenomenon time of an observation: either an instant or an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSpan {
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Builds an interval, swapping the bounds if they arrive reversed.
    pub fn interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_is_half_open() {
        let bucket = TimeBucket::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap(),
        );
        assert_eq!(bucket.to_string(), "[2024-03-01T10:00:00Z, 2024-03-01T11:00:00Z)");
        assert!(bucket.contains(bucket.start));
        assert!(!bucket.contains(bucket.end));
    }

    #[test]
    fn test_interval_orders_bounds() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let span = TimeSpan::interval(b, a);
        assert_eq!(span.start, a);
        assert_eq!(span.end, b);
        assert!(!span.is_instant());
        assert!(TimeSpan::instant(a).is_instant());
    }
}
