use std::error::Error;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tally_statsd::metric;
use tokio::fs::DirBuilder;

use crate::aggregation::{CounterDelta, MetricsBatch};
use crate::bucketing::hour_bucket;
use crate::protocol::{BucketKey, MetricCounterRow, RawMetricEvent};
use crate::statsd::{MetricCounters, MetricGauges, MetricTimers};
use crate::store::{MetricsStore, MetricsStoreError, PersistenceError, StoreConfig};

/// [`MetricsStore`] backed by a SQLite database.
///
/// Holds nothing but the connection pool. All counters live in the `client_metrics_env` table,
/// every merge is a single `INSERT ... ON CONFLICT DO UPDATE` round trip per chunk of rows.
#[derive(Debug, Clone)]
pub struct SqliteMetricsStore {
    db: Pool<Sqlite>,
    config: StoreConfig,
}

impl SqliteMetricsStore {
    /// Initializes the [`SqliteMetricsStore`] with a supplied [`Pool`].
    ///
    /// The pool must point to a migrated database.
    pub fn new(db: Pool<Sqlite>, config: StoreConfig) -> Self {
        Self { db, config }
    }

    /// Prepares the [`SqliteMetricsStore`] by creating the database file and its folders and
    /// running all migrations.
    pub async fn prepare(path: &Path, config: &StoreConfig) -> Result<Self, PersistenceError> {
        tally_log::info!("metrics database {}", path.display());

        Self::setup(path, config).await?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            // Readers do not block the writer and vice versa.
            .journal_mode(SqliteJournalMode::Wal)
            // WAL mode is safe from corruption with synchronous=NORMAL.
            .synchronous(SqliteSynchronous::Normal)
            // Concurrent writers queue up on the database lock for at most this long.
            .busy_timeout(config.busy_timeout());

        let db = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_with(options)
            .await
            .map_err(PersistenceError::SetupFailed)?;

        Ok(Self::new(db, config.clone()))
    }

    /// Creates the database file if it does not exist yet and migrates it.
    ///
    /// The SQLite migrator takes no lock, so two processes opening a fresh database at the same
    /// time can both try to apply the same migration. The loser fails on the already created
    /// schema. In that case the migration is run once more, which finds it applied and succeeds.
    async fn setup(path: &Path, config: &StoreConfig) -> Result<(), PersistenceError> {
        Self::create_database_directory(path).await?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout())
            .create_if_missing(true);

        let db = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(PersistenceError::SetupFailed)?;

        let migrator = sqlx::migrate!("../migrations");
        let result = match migrator.run(&db).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tally_log::debug!(
                    error = &err as &dyn Error,
                    "retrying migration of metrics database"
                );
                migrator
                    .run(&db)
                    .await
                    .map_err(PersistenceError::MigrationError)
            }
        };

        db.close().await;

        result
    }

    /// Creates the directories for the database file.
    async fn create_database_directory(path: &Path) -> Result<(), PersistenceError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        if !parent.as_os_str().is_empty() && !parent.exists() {
            tally_log::debug!("creating directory for metrics database: {}", parent.display());
            DirBuilder::new()
                .recursive(true)
                .create(&parent)
                .await
                .map_err(PersistenceError::FileSetupError)?;
        }

        Ok(())
    }

    /// Returns the total number of hourly counter rows stored in the database.
    pub async fn total_count(&self) -> Result<u64, PersistenceError> {
        let count: i64 = build_count_all()
            .fetch_one(&self.db)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(PersistenceError::FetchError)?;

        metric!(gauge(MetricGauges::StoredRows) = count as u64);

        Ok(count as u64)
    }

    /// Adds all deltas to their rows within a single transaction.
    ///
    /// If any statement fails, the transaction is rolled back when it is dropped and none of the
    /// deltas are applied.
    async fn merge(&self, deltas: &[CounterDelta]) -> Result<(), sqlx::Error> {
        let mut tx = self.db.begin().await?;

        for chunk in deltas.chunks(self.config.max_rows_per_statement.max(1)) {
            build_upsert_counters(chunk).build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }

    /// Runs a query returning counter rows and records its duration.
    async fn fetch_rows<'a>(
        &self,
        name: &'static str,
        query: Query<'a, Sqlite, SqliteArguments<'a>>,
    ) -> Result<Vec<MetricCounterRow>, PersistenceError> {
        let start = Instant::now();

        let rows = query.fetch_all(&self.db).await.map_err(|err| {
            tally_log::error!(
                error = &err as &dyn Error,
                query = name,
                "failed to read metrics from the database",
            );
            PersistenceError::FetchError(err)
        })?;

        let rows = rows
            .into_iter()
            .map(extract_row)
            .collect::<Result<Vec<_>, _>>()?;

        metric!(
            timer(MetricTimers::RollupDuration) = start.elapsed(),
            query = name
        );

        Ok(rows)
    }

    /// Runs a query returning a single column of names.
    async fn fetch_names<'a>(
        &self,
        name: &'static str,
        query: Query<'a, Sqlite, SqliteArguments<'a>>,
    ) -> Result<Vec<String>, PersistenceError> {
        let start = Instant::now();

        let names = query
            .fetch_all(&self.db)
            .await
            .and_then(|rows| {
                rows.into_iter()
                    .map(|row| row.try_get::<String, _>(0))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(PersistenceError::FetchError)?;

        metric!(
            timer(MetricTimers::RollupDuration) = start.elapsed(),
            query = name
        );

        Ok(names)
    }
}

impl MetricsStore for SqliteMetricsStore {
    async fn batch_insert_metrics(&self, events: Vec<RawMetricEvent>) -> Result<(), MetricsStoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        metric!(counter(MetricCounters::EventsReceived) += events.len() as i64);

        let batch = match MetricsBatch::build(
            events,
            self.config.preaggregate,
            self.config.max_name_length,
        ) {
            Ok(batch) => batch,
            Err(err) => {
                tally_log::debug!(
                    error = &err as &dyn Error,
                    "rejected metrics batch",
                );
                metric!(counter(MetricCounters::BatchRejected) += 1);
                return Err(err.into());
            }
        };

        if let Err(err) = self.merge(batch.deltas()).await {
            tally_log::error!(
                error = &err as &dyn Error,
                events = batch.event_count(),
                deltas = batch.len(),
                "failed to write metrics to the database",
            );
            metric!(
                counter(MetricCounters::PersistenceFailed) += 1,
                operation = "batch_insert"
            );
            return Err(PersistenceError::WriteError(err).into());
        }

        metric!(counter(MetricCounters::DeltasMerged) += batch.len() as i64);
        metric!(timer(MetricTimers::BatchInsertDuration) = start.elapsed());

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<MetricCounterRow>, MetricsStoreError> {
        Ok(self.fetch_rows("get_all", build_get_all()).await?)
    }

    async fn get_metrics_for_feature_toggle(
        &self,
        feature_name: &str,
    ) -> Result<Vec<MetricCounterRow>, MetricsStoreError> {
        let query = build_get_for_feature(feature_name);
        Ok(self.fetch_rows("get_for_feature", query).await?)
    }

    async fn get_metrics_for_feature_toggle_since(
        &self,
        feature_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricCounterRow>, MetricsStoreError> {
        let query = build_get_for_feature_since(feature_name, hour_bucket(&since).timestamp());
        Ok(self.fetch_rows("get_for_feature_since", query).await?)
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<MetricCounterRow>, MetricsStoreError> {
        let row = build_get_one(key)
            .fetch_optional(&self.db)
            .await
            .map_err(PersistenceError::FetchError)?;

        Ok(row.map(extract_row).transpose()?)
    }

    async fn get_seen_apps_for_feature_toggle(
        &self,
        feature_name: &str,
    ) -> Result<Vec<String>, MetricsStoreError> {
        let query = build_get_seen_apps(feature_name);
        Ok(self.fetch_names("seen_apps", query).await?)
    }

    async fn get_seen_toggles_for_app(&self, app_name: &str) -> Result<Vec<String>, MetricsStoreError> {
        let query = build_get_seen_toggles(app_name);
        Ok(self.fetch_names("seen_toggles", query).await?)
    }
}

/// Deserializes a [`MetricCounterRow`] from a database row.
fn extract_row(row: SqliteRow) -> Result<MetricCounterRow, PersistenceError> {
    let seconds: i64 = row
        .try_get("timestamp")
        .map_err(PersistenceError::FetchError)?;
    let timestamp =
        DateTime::from_timestamp(seconds, 0).ok_or(PersistenceError::InvalidTimestamp(seconds))?;

    let get = |column: &str| row.try_get(column).map_err(PersistenceError::FetchError);

    Ok(MetricCounterRow {
        feature_name: get("feature_name")?,
        app_name: get("app_name")?,
        environment: get("environment")?,
        timestamp,
        yes: row
            .try_get("yes_count")
            .map_err(PersistenceError::FetchError)?,
        no: row
            .try_get("no_count")
            .map_err(PersistenceError::FetchError)?,
    })
}

/// Builds a statement that adds every delta to its row, creating missing rows.
///
/// Deltas sharing a key within the same statement are applied one after another, so duplicates
/// add up like separate statements would.
fn build_upsert_counters(deltas: &[CounterDelta]) -> QueryBuilder<'_, Sqlite> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO client_metrics_env \
         (feature_name, app_name, environment, timestamp, yes_count, no_count) ",
    );

    builder.push_values(deltas, |mut b, delta| {
        b.push_bind(delta.key.feature_name.as_str())
            .push_bind(delta.key.app_name.as_str())
            .push_bind(delta.key.environment.as_str())
            .push_bind(delta.key.timestamp.timestamp())
            .push_bind(delta.yes)
            .push_bind(delta.no);
    });

    builder.push(
        " ON CONFLICT (feature_name, app_name, environment, timestamp) DO UPDATE SET \
         yes_count = yes_count + excluded.yes_count, \
         no_count = no_count + excluded.no_count",
    );

    builder
}

/// Returns the query to select all counter rows.
fn build_get_all<'a>() -> Query<'a, Sqlite, SqliteArguments<'a>> {
    sqlx::query(
        "SELECT feature_name, app_name, environment, timestamp, yes_count, no_count
         FROM client_metrics_env
         ORDER BY timestamp, feature_name, app_name, environment;",
    )
}

/// Returns the query to select all counter rows of one feature.
fn build_get_for_feature(feature_name: &str) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        "SELECT feature_name, app_name, environment, timestamp, yes_count, no_count
         FROM client_metrics_env
         WHERE feature_name = ?
         ORDER BY timestamp, app_name, environment;",
    )
    .bind(feature_name)
}

/// Returns the query to select the counter rows of one feature starting at the given hour.
fn build_get_for_feature_since(
    feature_name: &str,
    since: i64,
) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        "SELECT feature_name, app_name, environment, timestamp, yes_count, no_count
         FROM client_metrics_env
         WHERE feature_name = ? AND timestamp >= ?
         ORDER BY timestamp, app_name, environment;",
    )
    .bind(feature_name)
    .bind(since)
}

/// Returns the query to select the row of a single bucket key.
fn build_get_one(key: &BucketKey) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        "SELECT feature_name, app_name, environment, timestamp, yes_count, no_count
         FROM client_metrics_env
         WHERE feature_name = ? AND app_name = ? AND environment = ? AND timestamp = ?;",
    )
    .bind(key.feature_name.as_str())
    .bind(key.app_name.as_str())
    .bind(key.environment.as_str())
    .bind(key.timestamp.timestamp())
}

/// Returns the query to select the distinct applications reporting a feature.
fn build_get_seen_apps(feature_name: &str) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        "SELECT DISTINCT app_name FROM client_metrics_env WHERE feature_name = ? ORDER BY app_name;",
    )
    .bind(feature_name)
}

/// Returns the query to select the distinct features reported by an application.
fn build_get_seen_toggles(app_name: &str) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        "SELECT DISTINCT feature_name FROM client_metrics_env WHERE app_name = ? ORDER BY feature_name;",
    )
    .bind(app_name)
}

/// Returns the query to count the hourly counter rows.
fn build_count_all<'a>() -> Query<'a, Sqlite, SqliteArguments<'a>> {
    sqlx::query("SELECT COUNT(1) FROM client_metrics_env;")
}
