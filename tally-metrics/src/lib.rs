//! Hourly usage counters of feature toggles.
//!
//! SDKs periodically report how often each feature toggle evaluated to enabled (`yes`) or
//! disabled (`no`). This crate folds these reports into one counter row per feature,
//! application, environment and clock hour, and answers rollup queries over the stored rows.
//!
//! # Buckets
//!
//! The identity of a row is its [`BucketKey`]. Report timestamps are truncated to the start of
//! their hour with [`hour_bucket`], so all reports of the same hour share a row:
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use tally_metrics::BucketKey;
//!
//! let first = BucketKey::new("demo", "web", "dev", Utc.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap());
//! let second = BucketKey::new("demo", "web", "dev", Utc.with_ymd_and_hms(2024, 3, 9, 10, 59, 0).unwrap());
//! assert_eq!(first, second);
//! ```
//!
//! # Merging
//!
//! [`MetricsStore::batch_insert_metrics`] validates a batch of [`RawMetricEvent`]s, optionally
//! sums events sharing a key in memory, and adds the counts to the stored rows. Adding happens
//! atomically in the database, so concurrent batches never overwrite each other. A batch is
//! applied completely or not at all.
//!
//! The [`SqliteMetricsStore`] is the only implementation and keeps no state besides its
//! connection pool.
#![warn(missing_docs)]

mod aggregation;
mod bucketing;
mod protocol;
mod statsd;
mod store;
mod validation;

#[cfg(test)]
mod testutils;

pub use self::aggregation::*;
pub use self::bucketing::*;
pub use self::protocol::*;
pub use self::store::*;
pub use self::validation::*;
