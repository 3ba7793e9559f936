//! Tally is a standalone server that aggregates statsd-style metrics.
//!
//! Clients send metric records over UDP. Tally merges them in memory and periodically flushes a
//! report of all counters, gauges, timings and sets. A line-based TCP admin channel allows to
//! inspect and clear the stores while the server is running.
//!
//! # Usage
//!
//! ```text
//! tally config init            # write a default config to .tally/config.yml
//! tally run                    # start the server
//! tally run --ingest-port 9125 # override a setting, also available as TALLY_INGEST_PORT
//! tally healthcheck            # ask a running server for its health
//! ```
//!
//! # Workspace Crates
//!
//! Tally is split into the following workspace crates:
//!
//!  - `tally`: Main entry point and command line interface.
//!  - [`tally-config`]: Static configuration for the CLI and server.
//!  - [`tally-log`]: Logging setup and utilities.
//!  - [`tally-metrics`]: Metrics protocol, aggregation and reports.
//!  - [`tally-server`]: Ingest, admin and flush services.
//!  - [`tally-system`]: Foundational system components for Tally's services.
//!  - [`tally-test`]: Helpers for testing.
//!
//! [`tally-config`]: ../tally_config/index.html
//! [`tally-log`]: ../tally_log/index.html
//! [`tally-metrics`]: ../tally_metrics/index.html
//! [`tally-server`]: ../tally_server/index.html
//! [`tally-system`]: ../tally_system/index.html
//! [`tally-test`]: ../tally_test/index.html

mod cli;
mod cliapp;
mod healthcheck;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
