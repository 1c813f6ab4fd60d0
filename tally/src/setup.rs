use anyhow::Result;
use tally_config::Config;
use tally_statsd::MetricsConfig;

/// Rejects configurations that cannot work regardless of the command.
pub fn check_config(config: &Config) -> Result<()> {
    let database_path = config.database_path();
    if database_path.is_dir() {
        anyhow::bail!(
            "the configured database path {} is a directory, expected a file",
            database_path.display()
        );
    }

    if config.sentry().enabled && config.sentry().dsn.is_none() {
        tally_log::warn!("sentry reporting is enabled but no dsn is configured");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    tally_log::debug!("using config folder {}", config.path().display());
    tally_log::debug!("  database: {}", config.database_path().display());
    tally_log::debug!("  preaggregate: {}", config.storage().preaggregate);
    tally_log::debug!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    tally_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        default_tags,
        sample_rate: config.metrics_sample_rate(),
    })?;

    Ok(())
}
