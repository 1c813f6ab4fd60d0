//! The Tally command line.
//!
//! Tally keeps hourly usage counters of feature toggles in a local SQLite database. SDK reports
//! are merged with `tally ingest`, the stored counters are queried with `tally rollup`,
//! `tally seen-apps` and `tally seen-toggles`.
//!
//! # Configuration
//!
//! Configuration is read from `config.yml` in the config folder, `.tally` by default. Create a
//! default configuration with:
//!
//! ```text
//! tally config init
//! ```
//!
//! The database path, log level, statsd host and pre-aggregation can be overridden with command
//! line flags or the `TALLY_DATABASE_PATH`, `TALLY_LOG_LEVEL`, `TALLY_STATSD` and
//! `TALLY_PREAGGREGATE` environment variables.
//!
//! # Exit codes
//!
//! - `0` on success.
//! - `1` on configuration and database errors. Ingesting the same input again may succeed.
//! - `2` if the input was rejected because it does not parse or contains invalid events. Nothing
//!   was stored.

mod cli;
mod commands;
mod setup;

use std::process;

use tally_log::Hub;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            cli::exit_code(&err)
        }
    };

    if let Some(client) = Hub::current().client() {
        client.close(None);
    }

    process::exit(exit_code);
}
