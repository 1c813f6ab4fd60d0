use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tally_config::Config;
use tally_metrics::{MetricCounterRow, MetricsStore, RawMetricEvent, SqliteMetricsStore};
use tokio::io::AsyncReadExt;

use crate::cli::{IngestArgs, RollupArgs};

/// The ingest payload is not a JSON list of metric events.
///
/// Nothing of such a payload is stored.
#[derive(Debug, thiserror::Error)]
#[error("invalid metrics payload")]
pub struct InvalidPayload(#[source] pub(crate) serde_json::Error);

/// Opens the metrics database, creating and migrating it if needed.
async fn open_store(config: &Config) -> Result<SqliteMetricsStore> {
    let path = config.database_path();
    SqliteMetricsStore::prepare(&path, config.storage())
        .await
        .with_context(|| format!("failed to open the metrics database {}", path.display()))
}

/// Reads the whole input file, or stdin for `-` and no file.
async fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut payload = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut payload)
                .await
                .context("failed to read from stdin")?;
            Ok(payload)
        }
    }
}

fn parse_events(payload: &[u8]) -> Result<Vec<RawMetricEvent>, InvalidPayload> {
    serde_json::from_slice(payload).map_err(InvalidPayload)
}

pub async fn ingest(config: &Config, args: IngestArgs) -> Result<()> {
    let payload = read_input(args.file.as_deref()).await?;
    let events = parse_events(&payload)?;

    let store = open_store(config).await?;
    let count = events.len();
    store
        .batch_insert_metrics(events)
        .await
        .context("failed to ingest metrics")?;

    let rows = store.total_count().await?;
    tally_log::info!("merged {count} events, {rows} hourly rows stored");

    writeln!(io::stdout().lock(), "ingested {count} events")?;
    Ok(())
}

pub async fn rollup(config: &Config, args: RollupArgs) -> Result<()> {
    let store = open_store(config).await?;

    let rows = match (args.feature, args.since) {
        (Some(feature), Some(since)) => {
            store
                .get_metrics_for_feature_toggle_since(&feature, since)
                .await?
        }
        (Some(feature), None) => store.get_metrics_for_feature_toggle(&feature).await?,
        (None, _) => store.get_all().await?,
    };

    let mut stdout = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &rows)?;
        writeln!(stdout)?;
    } else {
        write_table(&mut stdout, &rows)?;
    }

    Ok(())
}

pub async fn seen_apps(config: &Config, feature: &str) -> Result<()> {
    let store = open_store(config).await?;
    let apps = store.get_seen_apps_for_feature_toggle(feature).await?;
    write_lines(&mut io::stdout().lock(), &apps)
}

pub async fn seen_toggles(config: &Config, app: &str) -> Result<()> {
    let store = open_store(config).await?;
    let features = store.get_seen_toggles_for_app(app).await?;
    write_lines(&mut io::stdout().lock(), &features)
}

pub fn init_config(path: &Path) -> Result<()> {
    let config = Config::init_at(path).context("failed to create config")?;
    writeln!(
        io::stdout().lock(),
        "created config in {}",
        config.path().display()
    )?;
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let yaml = config.to_yaml_string()?;
    io::stdout().lock().write_all(yaml.as_bytes())?;
    Ok(())
}

fn write_table(writer: &mut impl Write, rows: &[MetricCounterRow]) -> Result<()> {
    writeln!(writer, "HOUR\tFEATURE\tAPP\tENVIRONMENT\tYES\tNO")?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.timestamp.to_rfc3339(),
            row.feature_name,
            row.app_name,
            row.environment,
            row.yes,
            row.no
        )?;
    }
    Ok(())
}

fn write_lines(writer: &mut impl Write, lines: &[String]) -> Result<()> {
    for line in lines {
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_write_table() {
        let rows = vec![MetricCounterRow {
            feature_name: "demo".to_owned(),
            app_name: "web".to_owned(),
            environment: "dev".to_owned(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap(),
            yes: 3,
            no: 5,
        }];

        let mut output = Vec::new();
        write_table(&mut output, &rows).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "HOUR\tFEATURE\tAPP\tENVIRONMENT\tYES\tNO\n\
             2024-03-09T10:00:00+00:00\tdemo\tweb\tdev\t3\t5\n"
        );
    }

    #[tokio::test]
    async fn test_read_input_file() {
        let path = std::env::temp_dir().join(format!("tally-input-{}.json", std::process::id()));
        tokio::fs::write(&path, b"[]").await.unwrap();

        let payload = read_input(Some(&path)).await.unwrap();
        assert_eq!(payload, b"[]");

        assert!(read_input(Some(&path.with_extension("missing"))).await.is_err());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_parse_events() {
        let payload = br#"[{
            "featureName": "demo",
            "appName": "web",
            "environment": "dev",
            "timestamp": "2024-03-09T10:10:11Z",
            "yes": 1,
            "no": 2
        }]"#;
        let events = parse_events(payload).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].feature_name, "demo");

        assert!(parse_events(b"{").is_err());
        assert!(parse_events(br#"[{"featureName": "demo"}]"#).is_err());
    }
}
