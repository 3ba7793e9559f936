use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tally_config::Config;
use tally_metrics::Report;
use tally_system::{Controller, ServiceSet};
use tokio::sync::mpsc;

use crate::service::ServiceState;
use crate::services::{AdminService, FlushService, IngestService};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding a socket failed.
    #[error("bind to interface {addr} failed")]
    BindFailed {
        /// The address that was configured.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// The fully bound server, ready to start its services.
///
/// Binding happens eagerly in [`Server::bind`] so that address conflicts are reported before any
/// service is started. Starting requires a tokio runtime.
#[derive(Debug)]
pub struct Server {
    state: ServiceState,
    ingest: IngestService,
    admin: AdminService,
    flush: FlushService,
    ingest_addr: SocketAddr,
    admin_addr: SocketAddr,
}

impl Server {
    /// Binds the ingest socket and admin listener for the given configuration.
    pub fn bind(config: Arc<Config>, controller: &Controller) -> Result<Self, ServerError> {
        let state = ServiceState::new(config);

        let ingest = IngestService::new(state.clone(), controller.handle())?;
        let ingest_addr = ingest
            .local_addr()
            .map_err(|source| ServerError::BindFailed {
                addr: state.config().ingest_addr(),
                source,
            })?;

        let admin = AdminService::new(state.clone(), controller.handle())?;
        let admin_addr = admin
            .local_addr()
            .map_err(|source| ServerError::BindFailed {
                addr: state.config().admin_addr(),
                source,
            })?;

        let flush = FlushService::new(state.clone(), controller.handle());

        Ok(Self {
            state,
            ingest,
            admin,
            flush,
            ingest_addr,
            admin_addr,
        })
    }

    /// Returns the bound address of the UDP ingest socket.
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    /// Returns the bound address of the TCP admin listener.
    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    /// Returns the state shared by all services.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Returns a channel receiving every report produced by the flush service.
    ///
    /// Only the most recent subscription receives reports.
    pub fn subscribe_reports(&mut self) -> mpsc::UnboundedReceiver<Report> {
        self.flush.subscribe()
    }

    /// Starts all services on the current runtime.
    pub fn start(self) -> ServiceSet {
        let mut services = ServiceSet::new();
        services.start(self.ingest);
        services.start(self.admin);
        services.start(self.flush);
        services
    }
}
