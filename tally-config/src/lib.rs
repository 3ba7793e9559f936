//! Configuration for the Tally CLI and server.
//!
//! The configuration is loaded from a `config.yml` file in the config folder, which defaults to
//! `.tally` in the working directory. Every section and every field is optional:
//!
//! ```yaml
//! ingest:
//!   host: 127.0.0.1
//!   port: 8125
//! admin:
//!   port: 8126
//! aggregator:
//!   flush_interval: 10
//! logging:
//!   level: info
//! ```
//!
//! Selected values can be overridden from the command line or the environment through
//! [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use crate::config::*;
