use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::protocol::RawMetricEvent;

/// Sets up a temporary SQLite database for testing purposes.
pub async fn setup_db(run_migrations: bool) -> Pool<Sqlite> {
    let path = std::env::temp_dir().join(Uuid::new_v4().to_string());

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .create_if_missing(true);

    let db = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .unwrap();

    if run_migrations {
        sqlx::migrate!("../migrations").run(&db).await.unwrap();
    }

    db
}

/// 2024-03-09 10:10:11 UTC.
pub fn ten_past_ten() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 10, 10, 11).unwrap()
}

/// Creates an event in the `dev` environment.
pub fn event(
    feature_name: &str,
    app_name: &str,
    timestamp: DateTime<Utc>,
    yes: i64,
    no: i64,
) -> RawMetricEvent {
    RawMetricEvent {
        feature_name: feature_name.to_owned(),
        app_name: app_name.to_owned(),
        environment: "dev".to_owned(),
        timestamp: timestamp.fixed_offset(),
        yes,
        no,
    }
}
