//! Assignment of report timestamps to hourly buckets.

use chrono::{DateTime, TimeDelta, TimeZone, Timelike};

/// Returns the start of the clock hour containing `timestamp`.
///
/// Minutes, seconds and sub-second components are zeroed. The hour, day, month and year fields
/// stay unchanged, and the result keeps the time zone of the input. There is no conversion to UTC
/// before truncating, so the bucket always follows the wall clock of the given value.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use tally_metrics::hour_bucket;
///
/// let timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap();
/// let bucket = hour_bucket(&timestamp);
/// assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap());
/// ```
pub fn hour_bucket<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> DateTime<Tz> {
    let into_hour = TimeDelta::seconds(i64::from(timestamp.minute() * 60 + timestamp.second()))
        + TimeDelta::nanoseconds(i64::from(timestamp.nanosecond()));

    timestamp.clone() - into_hour
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;

    #[test]
    fn test_hour_bucket_truncates_minutes_and_seconds() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 10, 59, 59).unwrap()
            + TimeDelta::milliseconds(999);
        assert_eq!(
            hour_bucket(&timestamp),
            Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_hour_bucket_is_idempotent() {
        let bucket = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(hour_bucket(&bucket), bucket);
        assert_eq!(hour_bucket(&hour_bucket(&bucket)), bucket);
    }

    #[test]
    fn test_hour_bucket_same_hour_collapses() {
        let a = Utc.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 9, 10, 20, 11).unwrap();
        assert_eq!(hour_bucket(&a), hour_bucket(&b));
    }

    #[test]
    fn test_hour_bucket_adjacent_hours_differ() {
        let a = Utc.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 9, 11, 10, 11).unwrap();
        let (a, b) = (hour_bucket(&a), hour_bucket(&b));
        assert_ne!(a, b);
        assert_eq!(b - a, TimeDelta::hours(1));
    }

    #[test]
    fn test_hour_bucket_keeps_wall_clock_of_offset() {
        // Nepal is UTC+05:45, so the local hour does not start on a UTC hour.
        let offset = FixedOffset::east_opt(5 * 3600 + 45 * 60).unwrap();
        let timestamp = offset.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap();
        let bucket = hour_bucket(&timestamp);

        assert_eq!(bucket, offset.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap());
        assert_eq!(bucket.offset(), timestamp.offset());
    }

    #[test]
    fn test_hour_bucket_at_midnight_keeps_date() {
        let timestamp = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            hour_bucket(&timestamp),
            Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap()
        );
    }
}
