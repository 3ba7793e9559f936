use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};

use tally_log::LogError;
use tally_metrics::{AdminCounter, AdminStats, Aggregator, Metric};
use tally_system::{Service, ShutdownHandle};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::server::ServerError;
use crate::service::ServiceState;

/// Datagrams still read from the socket buffer after a shutdown was requested.
const DRAIN_LIMIT: usize = 4096;

/// Counts of one processed datagram.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IngestSummary {
    /// Records merged into the aggregator.
    pub accepted: usize,
    /// Records that failed to parse.
    pub rejected: usize,
}

/// Parses all records of a datagram and merges them into the aggregator.
///
/// Every non-blank record counts towards `total_records`. Invalid records are dropped and counted
/// as `bad_records`, valid ones count towards the received counter of their type.
pub fn ingest_datagram(aggregator: &Aggregator, stats: &AdminStats, data: &[u8]) -> IngestSummary {
    let mut summary = IngestSummary::default();

    for result in Metric::parse_all(data) {
        stats.incr(AdminCounter::TotalRecords);

        match result {
            Ok(metric) => {
                let ty = aggregator.insert(metric);
                stats.incr_received(ty);
                summary.accepted += 1;
            }
            Err(error) => {
                stats.incr(AdminCounter::BadRecords);
                summary.rejected += 1;
                tally_log::debug!("dropping invalid record: {error}");
            }
        }
    }

    summary
}

/// Receives metric datagrams on a UDP socket.
///
/// The service stops when a shutdown is requested. Datagrams already queued on the socket are
/// still processed before it returns.
#[derive(Debug)]
pub struct IngestService {
    state: ServiceState,
    socket: StdUdpSocket,
    shutdown: ShutdownHandle,
}

impl IngestService {
    /// Binds the ingest socket to the configured address.
    pub fn new(state: ServiceState, shutdown: ShutdownHandle) -> Result<Self, ServerError> {
        let addr = state.config().ingest_addr();
        let socket = StdUdpSocket::bind(addr)
            .and_then(|socket| socket.set_nonblocking(true).map(|()| socket))
            .map_err(|source| ServerError::BindFailed { addr, source })?;

        Ok(Self {
            state,
            socket,
            shutdown,
        })
    }

    /// Returns the address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn process(state: &ServiceState, data: &[u8], peer: SocketAddr) {
    let summary = ingest_datagram(state.aggregator(), state.stats(), data);
    tally_log::trace!(
        %peer,
        accepted = summary.accepted,
        rejected = summary.rejected,
        "processed datagram"
    );
}

async fn run(state: ServiceState, socket: UdpSocket, mut shutdown: ShutdownHandle) {
    let mut buf = vec![0; state.config().max_datagram_size()];

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => process(&state, &buf[..len], peer),
                Err(error) => {
                    tally_log::debug!("failed to receive datagram: {}", LogError(&error));
                }
            },
        }
    }

    // The std socket reads from the kernel directly, without waiting for readiness events.
    let socket = match socket.into_std() {
        Ok(socket) => socket,
        Err(error) => {
            tally_log::error!("failed to drain ingest socket: {}", LogError(&error));
            return;
        }
    };

    let mut drained = 0;
    while drained < DRAIN_LIMIT {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => process(&state, &buf[..len], peer),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
            Err(error) => {
                tally_log::debug!("failed to receive datagram: {}", LogError(&error));
            }
        }
        drained += 1;
    }

    tally_log::info!(drained, "ingest socket closed");
}

impl Service for IngestService {
    fn spawn_handler(self) -> JoinHandle<()> {
        let Self {
            state,
            socket,
            shutdown,
        } = self;

        tokio::spawn(async move {
            let socket = match UdpSocket::from_std(socket) {
                Ok(socket) => socket,
                Err(error) => {
                    tally_log::error!("failed to register ingest socket: {}", LogError(&error));
                    return;
                }
            };

            if let Ok(addr) = socket.local_addr() {
                tally_log::info!("accepting metrics on udp://{addr}");
            }

            run(state, socket, shutdown).await;
        })
    }
}
