use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tally_config::{Config, OverridableConfig};
use tally_metrics::MetricsStoreError;

use crate::{commands, setup};

/// Exit code for input that was rejected without storing anything.
const EXIT_INVALID_INPUT: i32 = 2;

/// Hourly usage counters for feature toggles.
#[derive(Parser, Debug)]
#[command(name = "tally", version, max_term_width = 79)]
struct Cli {
    /// The path to the config folder.
    #[arg(
        short,
        long,
        global = true,
        value_name = "DIR",
        default_value = ".tally",
        env = "TALLY_CONFIG"
    )]
    config: PathBuf,

    /// Path of the SQLite database, relative to the config folder.
    #[arg(long, global = true, value_name = "PATH", env = "TALLY_DATABASE_PATH")]
    database_path: Option<String>,

    /// The log level of Tally.
    #[arg(long, global = true, value_name = "LEVEL", env = "TALLY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Hostname and port of the statsd server. An empty value disables metrics.
    #[arg(long, global = true, value_name = "HOST:PORT", env = "TALLY_STATSD")]
    statsd: Option<String>,

    /// Sum events with the same key in memory before writing.
    #[arg(long, global = true, value_name = "BOOL", env = "TALLY_PREAGGREGATE")]
    preaggregate: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge SDK metric reports into the hourly counters.
    ///
    /// Reads a JSON array of events with the fields `featureName`, `appName`, `environment`,
    /// `timestamp`, `yes` and `no`. Either all events are stored or none.
    Ingest(IngestArgs),

    /// Print hourly counter rows.
    Rollup(RollupArgs),

    /// Print the applications that reported a feature toggle.
    SeenApps {
        /// Name of the feature toggle.
        feature: String,
    },

    /// Print the feature toggles reported by an application.
    SeenToggles {
        /// Name of the application.
        app: String,
    },

    /// Manage the Tally config.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON file to read, `-` or nothing reads from stdin.
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RollupArgs {
    /// Only print rows of this feature toggle.
    #[arg(long)]
    pub feature: Option<String>,

    /// Only print rows from the hour containing this RFC 3339 time stamp onwards.
    #[arg(long, requires = "feature")]
    pub since: Option<DateTime<Utc>>,

    /// Print rows as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Create a config folder with the default configuration.
    Init,

    /// Print the effective configuration.
    Show,
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let Cli {
        config: config_path,
        database_path,
        log_level,
        statsd,
        preaggregate,
        command,
    } = Cli::parse();

    let overrides = OverridableConfig {
        database_path,
        log_level,
        statsd,
        preaggregate,
    };

    match command {
        Command::Config {
            command: ConfigCommand::Init,
        } => commands::init_config(&config_path),
        Command::Config {
            command: ConfigCommand::Show,
        } => commands::show_config(&load_config(&config_path, overrides)?),
        Command::Ingest(args) => {
            let config = init(&config_path, overrides)?;
            block_on(commands::ingest(&config, args))
        }
        Command::Rollup(args) => {
            let config = init(&config_path, overrides)?;
            block_on(commands::rollup(&config, args))
        }
        Command::SeenApps { feature } => {
            let config = init(&config_path, overrides)?;
            block_on(commands::seen_apps(&config, &feature))
        }
        Command::SeenToggles { app } => {
            let config = init(&config_path, overrides)?;
            block_on(commands::seen_toggles(&config, &app))
        }
    }
}

/// Returns the process exit code for a failed command.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    let invalid_input = error
        .downcast_ref::<MetricsStoreError>()
        .is_some_and(MetricsStoreError::is_validation)
        || error.downcast_ref::<commands::InvalidPayload>().is_some();

    if invalid_input { EXIT_INVALID_INPUT } else { 1 }
}

fn load_config(path: &Path, overrides: OverridableConfig) -> Result<Config> {
    let mut config = Config::from_path(path).with_context(|| {
        format!(
            "failed to load config from {}, create one with `tally config init`",
            path.display()
        )
    })?;

    config.apply_override(overrides)?;
    Ok(config)
}

/// Loads the config and sets up logging and metrics.
fn init(path: &Path, overrides: OverridableConfig) -> Result<Config> {
    let config = load_config(path, overrides)?;

    tally_log::init(config.logging(), config.sentry());
    setup::check_config(&config)?;
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    Ok(config)
}

fn block_on(future: impl Future<Output = Result<()>>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tally-worker")
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(future)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use tally_metrics::PersistenceError;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rollup() {
        let cli = Cli::try_parse_from([
            "tally",
            "--config",
            "/tmp/tally",
            "rollup",
            "--feature",
            "demo",
            "--since",
            "2024-03-09T10:10:11Z",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/tmp/tally"));
        let Command::Rollup(args) = cli.command else {
            panic!("expected rollup");
        };
        assert_eq!(args.feature.as_deref(), Some("demo"));
        assert_eq!(
            args.since.map(|since| since.to_rfc3339()),
            Some("2024-03-09T10:10:11+00:00".to_owned())
        );
        assert!(args.json);
    }

    #[test]
    fn test_since_requires_feature() {
        let result = Cli::try_parse_from(["tally", "rollup", "--since", "2024-03-09T10:10:11Z"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_exit_codes() {
        let invalid = serde_json::from_str::<Vec<u32>>("[").unwrap_err();
        let error = anyhow::Error::new(commands::InvalidPayload(invalid));
        assert_eq!(exit_code(&error), EXIT_INVALID_INPUT);

        // Failing to write JSON output is not an input error.
        let output = serde_json::from_str::<Vec<u32>>("[").unwrap_err();
        assert_eq!(exit_code(&anyhow::Error::new(output)), 1);

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = anyhow::Error::new(MetricsStoreError::from(
            PersistenceError::FileSetupError(missing),
        ));
        assert_eq!(exit_code(&error), 1);

        assert_eq!(exit_code(&anyhow::anyhow!("something else")), 1);
    }
}
