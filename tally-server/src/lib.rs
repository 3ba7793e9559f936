//! The Tally server.
//!
//! A Tally server runs three services on a shared multi-threaded runtime:
//!
//!  - The **ingest** service receives statsd-style datagrams on a UDP socket, parses every record
//!    and merges it into the aggregator.
//!  - The **admin** service serves a line-based protocol on a TCP listener to inspect and clear
//!    the stores and to read the server's own counters.
//!  - The **flush** service periodically renders a report of all stores, logs it and resets the
//!    stores according to the configured flush policy.
//!
//! All services share a [`ServiceState`] holding the configuration, the aggregator and the admin
//! counters. Shutdown is coordinated through a [`Controller`](tally_system::Controller), which
//! listens for process signals.
//!
//! # Admin protocol
//!
//! Clients send one command per line. Every response is terminated by `END` followed by an empty
//! line. `quit` closes the connection:
//!
//! ```text
//! > counters
//! {
//!   "gorets": 13
//! }
//! END
//!
//! > health
//! health: up
//! END
//!
//! ```
#![warn(missing_docs)]

mod server;
mod service;
mod services;

use std::sync::Arc;
use std::time::Duration;

use tally_config::Config;
use tally_system::Controller;

pub use self::server::*;
pub use self::service::ServiceState;
pub use self::services::*;

/// Additional time granted to services after the shutdown timeout elapsed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Runs a Tally server until it is shut down.
///
/// This binds all sockets, starts the services and blocks the current thread until a shutdown
/// signal is received. A graceful shutdown waits up to the configured shutdown timeout for the
/// services to finish their work, including the final flush.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let shutdown_timeout = config.shutdown_timeout();

    let runtime = tally_system::create_runtime("tally-rt", config.cpu_concurrency())?;
    let controller = Controller::new();

    // Binding happens outside of the runtime, so a conflict is reported before anything starts.
    let server = Server::bind(Arc::clone(&config), &controller)?;
    tally_log::info!(
        ingest = %server.ingest_addr(),
        admin = %server.admin_addr(),
        "tally server starting"
    );

    runtime.block_on(async move {
        let services = server.start();

        let signals = controller.clone();
        tokio::spawn(async move {
            if let Err(error) = signals.listen_signals(shutdown_timeout).await {
                tally_log::error!(
                    "failed to listen for signals: {}",
                    tally_log::LogError(&error)
                );
            }
        });

        let mut handle = controller.handle();
        let shutdown = handle.notified().await;
        let timeout = shutdown.timeout.unwrap_or_default() + SHUTDOWN_GRACE;

        if shutdown.timeout.is_some() {
            tally_log::info!("shutting down gracefully within {}s", timeout.as_secs());
            tokio::select! {
                _ = services.join_timeout(timeout) => (),
                _ = handle.forced() => tally_log::info!("forced shutdown"),
            }
        } else {
            tally_log::info!("shutting down immediately");
            services.join_timeout(timeout).await;
        }
    });

    // Do not wait for tasks that ignored the shutdown.
    runtime.shutdown_background();
    tally_log::info!("tally server stopped");

    Ok(())
}
