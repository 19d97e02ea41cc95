use chrono::{DateTime, Duration, Utc};

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct TimeRange {
    pub start: chrono::DateTime<Utc>,
    pub end: chrono::DateTime<Utc>,
}

impl TimeRange {
    /// The `days`-long window ending at `now`.
    pub fn lookback(now: DateTime<Utc>, days: i64) -> Self {
        TimeRange {
            start: now - Duration::days(days),
            end: now,
        }
    }

    pub fn format_start(&self) -> String {
        self.start.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    pub fn format_end(&self) -> String {
        self.end.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::time_range::TimeRange;
    use chrono::{DateTime, TimeZone, Utc};
    use std::str::FromStr;

    #[tokio::test]
    async fn test_lookback() {
        let now = DateTime::<Utc>::from_str("2020-12-15T15:00:00.0+00:00").unwrap();

        let time_range = TimeRange::lookback(now, 14);
        assert_eq!(
            time_range,
            TimeRange {
                start: Utc.ymd(2020, 12, 1).and_hms(15, 0, 0),
                end: now,
            }
        );
        assert_eq!(time_range.format_start(), "2020-12-01T15:00:00Z");
        assert_eq!(time_range.format_end(), "2020-12-15T15:00:00Z");
    }

    #[tokio::test]
    async fn test_lookback_across_month_boundary() {
        let now = DateTime::<Utc>::from_str("2021-03-02T00:00:00.0+00:00").unwrap();

        let time_range = TimeRange::lookback(now, 3);
        assert_eq!(time_range.start, Utc.ymd(2021, 2, 27).and_hms(0, 0, 0));
    }
}
