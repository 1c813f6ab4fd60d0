//! Configuration for the Tally CLI.
//!
//! Tally reads its configuration from a folder, `.tally` in the working directory by default. The
//! folder contains a `config.yml` with the following sections, all of which are optional:
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: auto
//! sentry:
//!   enabled: false
//! metrics:
//!   statsd: 127.0.0.1:8125
//!   prefix: tally
//! storage:
//!   path: metrics.sqlite
//!   preaggregate: true
//! ```
//!
//! Individual values can be overridden from the command line or the environment with
//! [`Config::apply_override`].
#![warn(missing_docs)]

mod config;

pub use self::config::*;
