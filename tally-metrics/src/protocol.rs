use std::fmt;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::bucketing::hour_bucket;

/// A single usage report sent by an SDK.
///
/// The SDK reports how often a feature toggle was evaluated to enabled (`yes`) and disabled (`no`)
/// since its last report. Events are only kept in memory until they are merged into the hourly
/// [`MetricCounterRow`] with the same [`BucketKey`].
///
/// Counts are signed on the wire so that negative values are rejected by validation rather than
/// failing to parse.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetricEvent {
    /// Name of the feature toggle.
    pub feature_name: String,
    /// Name of the reporting application.
    pub app_name: String,
    /// Environment the toggle was evaluated in.
    pub environment: String,
    /// Point in time reported by the SDK, with the offset the SDK sent.
    pub timestamp: DateTime<FixedOffset>,
    /// Number of evaluations to enabled.
    pub yes: i64,
    /// Number of evaluations to disabled.
    pub no: i64,
}

/// Identity of an hourly counter row.
///
/// Two events with the same feature, application and environment whose timestamps fall into the
/// same clock hour share a key. The store keeps exactly one row per key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketKey {
    /// Name of the feature toggle.
    pub feature_name: String,
    /// Name of the reporting application.
    pub app_name: String,
    /// Environment the toggle was evaluated in.
    pub environment: String,
    /// Start of the hour bucket.
    pub timestamp: DateTime<Utc>,
}

impl BucketKey {
    /// Creates a key for the hour containing `timestamp`.
    ///
    /// The hour is taken from the wall clock of `timestamp` in its own time zone. The resulting
    /// hour start is kept in UTC.
    pub fn new<Tz: TimeZone>(
        feature_name: impl Into<String>,
        app_name: impl Into<String>,
        environment: impl Into<String>,
        timestamp: DateTime<Tz>,
    ) -> Self {
        Self {
            feature_name: feature_name.into(),
            app_name: app_name.into(),
            environment: environment.into(),
            timestamp: hour_bucket(&timestamp).with_timezone(&Utc),
        }
    }

    /// Derives the bucket key of a raw event.
    pub fn from_event(event: &RawMetricEvent) -> Self {
        Self::new(
            event.feature_name.as_str(),
            event.app_name.as_str(),
            event.environment.as_str(),
            event.timestamp,
        )
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.feature_name,
            self.app_name,
            self.environment,
            self.timestamp.to_rfc3339()
        )
    }
}

/// Hourly usage counters of one feature toggle in one application and environment.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricCounterRow {
    /// Name of the feature toggle.
    pub feature_name: String,
    /// Name of the reporting application.
    pub app_name: String,
    /// Environment the toggle was evaluated in.
    pub environment: String,
    /// Start of the hour bucket.
    pub timestamp: DateTime<Utc>,
    /// Sum of all `yes` counts reported for this key.
    pub yes: i64,
    /// Sum of all `no` counts reported for this key.
    pub no: i64,
}

impl MetricCounterRow {
    /// Returns the identity of this row.
    pub fn key(&self) -> BucketKey {
        BucketKey {
            feature_name: self.feature_name.clone(),
            app_name: self.app_name.clone(),
            environment: self.environment.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_sdk_report() {
        let json = r#"{
            "featureName": "demo",
            "appName": "web",
            "environment": "dev",
            "timestamp": "2024-03-09T10:10:11.123Z",
            "yes": 2,
            "no": 3
        }"#;

        let event: RawMetricEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.feature_name, "demo");
        assert_eq!(event.app_name, "web");
        assert_eq!(event.yes, 2);
        assert_eq!(event.no, 3);

        let key = BucketKey::from_event(&event);
        assert_eq!(
            key.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_negative_count() {
        let json = r#"{
            "featureName": "demo",
            "appName": "web",
            "environment": "dev",
            "timestamp": "2024-03-09T10:10:11Z",
            "yes": -1,
            "no": 0
        }"#;

        // Parsing succeeds, rejecting negative counts is up to validation.
        let event: RawMetricEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.yes, -1);
    }

    #[test]
    fn test_bucket_keeps_sdk_offset() {
        let json = r#"{
            "featureName": "demo",
            "appName": "web",
            "environment": "dev",
            "timestamp": "2024-03-09T10:10:11+05:45",
            "yes": 1,
            "no": 0
        }"#;

        let event: RawMetricEvent = serde_json::from_str(json).unwrap();
        let key = BucketKey::from_event(&event);

        // 10:00 at +05:45, not the UTC hour of 04:25:11Z.
        assert_eq!(
            key.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 9, 4, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_bucket_key_display() {
        let key = BucketKey::new(
            "demo",
            "web",
            "dev",
            Utc.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap(),
        );
        assert_eq!(key.to_string(), "demo/web/dev@2024-03-09T10:00:00+00:00");
    }

    #[test]
    fn test_row_key() {
        let row = MetricCounterRow {
            feature_name: "demo".to_owned(),
            app_name: "web".to_owned(),
            environment: "dev".to_owned(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap(),
            yes: 1,
            no: 0,
        };
        assert_eq!(
            row.key(),
            BucketKey::new("demo", "web", "dev", row.timestamp)
        );
    }
}
