//! Durable hourly counters and their rollup queries.

mod sqlite;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::migrate::MigrateError;

use crate::protocol::{BucketKey, MetricCounterRow, RawMetricEvent};
use crate::validation::{DEFAULT_MAX_NAME_LENGTH, ValidationError};

pub use self::sqlite::*;

/// Parameters used by the [`SqliteMetricsStore`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    ///
    /// Defaults to `metrics.sqlite` inside the config folder.
    pub path: Option<PathBuf>,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of connections kept open in the pool.
    pub min_connections: u32,

    /// Time in milliseconds a write waits for a concurrent writer to release the database lock.
    pub busy_timeout_ms: u64,

    /// Sums events with the same bucket key in memory before writing.
    ///
    /// This only reduces the number of rows written per batch, the stored counts are the same
    /// either way.
    pub preaggregate: bool,

    /// Maximum number of rows in a single `INSERT` statement.
    ///
    /// Every row binds six parameters, larger batches are split into several statements within
    /// the same transaction.
    pub max_rows_per_statement: usize,

    /// Maximum length in bytes of feature, application and environment names.
    pub max_name_length: usize,
}

impl StoreConfig {
    /// Returns the busy timeout as [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 4,
            min_connections: 1,
            busy_timeout_ms: 5_000,
            preaggregate: true,
            max_rows_per_statement: 150,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

/// The store failed to complete a read or write.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The database could not be opened.
    #[error("failed to setup the database: {0}")]
    SetupFailed(sqlx::Error),

    /// The folder of the database file could not be created.
    #[error("failed to create the database directory: {0}")]
    FileSetupError(std::io::Error),

    /// The schema could not be migrated.
    #[error("failed to migrate the database: {0}")]
    MigrationError(MigrateError),

    /// A write failed and was rolled back.
    #[error("failed to write to the database: {0}")]
    WriteError(sqlx::Error),

    /// A query failed.
    #[error("failed to read from the database: {0}")]
    FetchError(sqlx::Error),

    /// A stored hour start is out of the supported date range.
    #[error("found invalid bucket timestamp {0} in the database")]
    InvalidTimestamp(i64),
}

/// An error returned by [`MetricsStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsStoreError {
    /// The batch was rejected without being written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store could not be read or written.
    ///
    /// Writes are all-or-nothing, so the caller may retry the whole batch.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl MetricsStoreError {
    /// Returns `true` if the error was caused by the submitted data.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns `true` if submitting the same batch again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Storage of hourly usage counters.
///
/// Implementations hold no counts in memory between calls. Every merge is an atomic
/// insert-or-add against the backing store, so any number of callers can merge into the same
/// rows concurrently without losing updates.
pub trait MetricsStore: Send + Sync {
    /// Merges a batch of raw events into the hourly counters.
    ///
    /// The batch is validated as a whole first. If any event is invalid, nothing is written. A
    /// batch is either fully merged or, on error, not applied at all. An empty batch is a no-op.
    fn batch_insert_metrics(
        &self,
        events: Vec<RawMetricEvent>,
    ) -> impl Future<Output = Result<(), MetricsStoreError>> + Send;

    /// Returns all counter rows ordered by hour, feature, application and environment.
    fn get_all(&self) -> impl Future<Output = Result<Vec<MetricCounterRow>, MetricsStoreError>> + Send;

    /// Returns all counter rows of one feature across applications, environments and hours.
    ///
    /// Unknown features yield an empty list.
    fn get_metrics_for_feature_toggle(
        &self,
        feature_name: &str,
    ) -> impl Future<Output = Result<Vec<MetricCounterRow>, MetricsStoreError>> + Send;

    /// Returns the counter rows of one feature from the hour containing `since` onwards.
    fn get_metrics_for_feature_toggle_since(
        &self,
        feature_name: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<MetricCounterRow>, MetricsStoreError>> + Send;

    /// Returns the row stored under `key`, if any.
    ///
    /// The timestamp of the key must be the start of an hour, see [`BucketKey::new`].
    fn get(
        &self,
        key: &BucketKey,
    ) -> impl Future<Output = Result<Option<MetricCounterRow>, MetricsStoreError>> + Send;

    /// Returns `true` if a row is stored under `key`.
    fn exists(&self, key: &BucketKey) -> impl Future<Output = Result<bool, MetricsStoreError>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Returns the sorted names of all applications that reported the feature.
    fn get_seen_apps_for_feature_toggle(
        &self,
        feature_name: &str,
    ) -> impl Future<Output = Result<Vec<String>, MetricsStoreError>> + Send;

    /// Returns the sorted names of all features reported by the application.
    fn get_seen_toggles_for_app(
        &self,
        app_name: &str,
    ) -> impl Future<Output = Result<Vec<String>, MetricsStoreError>> + Send;
}
