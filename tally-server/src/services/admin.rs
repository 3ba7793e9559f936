use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tally_log::LogError;
use tally_metrics::{AdminCounter, AdminStats, Aggregator, MetricType, StoreSnapshot};
use tally_system::{Service, ShutdownHandle};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};

use crate::server::ServerError;
use crate::service::ServiceState;

/// Terminates every response.
const RESPONSE_TRAILER: &str = "END\n\n";

/// Sent to connections beyond `admin.max_connections` before closing them.
const TOO_MANY_CONNECTIONS: &str = "ERROR: too many connections\nEND\n\n";

const HELP: &str = "\
Commands:
  counters     dump all counters
  timers       dump all timers
  gauges       dump all gauges
  sets         dump all sets
  delcounters  delete all counters
  deltimers    delete all timers
  delgauges    delete all gauges
  delsets      delete all sets
  stats        show statistics
  health       show health status
  help         show this message
  quit         close the connection";

/// A command of the admin protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdminCommand {
    /// Dumps the store of one metric type.
    Dump(MetricType),
    /// Clears the store of one metric type.
    Delete(MetricType),
    /// Shows the admin counters.
    Stats,
    /// Replies with the health status.
    Health,
    /// Lists all commands.
    Help,
    /// Closes the connection.
    Quit,
}

/// Error returned for lines that are not a known [`AdminCommand`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown command")]
pub struct UnknownCommand;

impl FromStr for AdminCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "counters" => Self::Dump(MetricType::Counter),
            "timers" => Self::Dump(MetricType::Timing),
            "gauges" => Self::Dump(MetricType::Gauge),
            "sets" => Self::Dump(MetricType::Set),
            "delcounters" => Self::Delete(MetricType::Counter),
            "deltimers" => Self::Delete(MetricType::Timing),
            "delgauges" => Self::Delete(MetricType::Gauge),
            "delsets" => Self::Delete(MetricType::Set),
            "stats" => Self::Stats,
            "health" => Self::Health,
            "help" => Self::Help,
            "quit" => Self::Quit,
            _ => return Err(UnknownCommand),
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|error| format!("ERROR: {error}"))
}

fn dump(snapshot: StoreSnapshot) -> String {
    match snapshot {
        StoreSnapshot::Counters(map) => to_json(&map.into_iter().collect::<BTreeMap<_, _>>()),
        StoreSnapshot::Gauges(map) => to_json(&map.into_iter().collect::<BTreeMap<_, _>>()),
        StoreSnapshot::Timings(map) => to_json(&map.into_iter().collect::<BTreeMap<_, _>>()),
        StoreSnapshot::Sets(map) => {
            let sets: BTreeMap<_, _> = map
                .into_iter()
                .map(|(bucket, values)| {
                    let mut values: Vec<_> = values.into_iter().collect();
                    values.sort_unstable();
                    (bucket, values)
                })
                .collect();
            to_json(&sets)
        }
    }
}

/// Executes a command and renders its response body.
///
/// Returns `None` if the connection should be closed. The body does not include the response
/// trailer.
pub fn execute(
    aggregator: &Aggregator,
    stats: &AdminStats,
    command: Result<AdminCommand, UnknownCommand>,
) -> Option<String> {
    let body = match command {
        Ok(AdminCommand::Dump(ty)) => {
            stats.incr_dump(ty);
            dump(aggregator.snapshot(ty))
        }
        Ok(AdminCommand::Delete(ty)) => {
            stats.incr_delete(ty);
            aggregator
                .clear(ty)
                .iter()
                .map(|bucket| format!("deleted: {bucket}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Ok(AdminCommand::Stats) => stats
            .snapshot()
            .to_json_pretty()
            .unwrap_or_else(|error| format!("ERROR: {error}")),
        Ok(AdminCommand::Health) => {
            stats.incr(AdminCounter::HealthRequests);
            "health: up".to_owned()
        }
        Ok(AdminCommand::Help) => HELP.to_owned(),
        Ok(AdminCommand::Quit) => return None,
        Err(error) => format!("ERROR: {error}"),
    };

    Some(body)
}

fn render(body: &str) -> String {
    if body.is_empty() {
        RESPONSE_TRAILER.to_owned()
    } else {
        format!("{body}\n{RESPONSE_TRAILER}")
    }
}

/// A frame of the admin protocol.
#[derive(Debug, Eq, PartialEq)]
enum CommandLine {
    /// A complete line without its line ending.
    Line(String),
    /// A line exceeding the maximum length. It is skipped up to its line ending.
    TooLong,
}

/// Splits the admin stream into lines of bounded length.
///
/// Unlike a plain [`LinesCodec`], an over-long line is yielded as a frame instead of an error, so
/// the framed stream keeps decoding lines that are already buffered.
#[derive(Debug)]
struct CommandCodec(LinesCodec);

impl CommandCodec {
    fn new(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }

    fn map(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<CommandLine>> {
        match result {
            Ok(line) => Ok(line.map(CommandLine::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(CommandLine::TooLong)),
            Err(LinesCodecError::Io(error)) => Err(error),
        }
    }
}

impl Decoder for CommandCodec {
    type Item = CommandLine;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<CommandLine>> {
        Self::map(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<CommandLine>> {
        Self::map(self.0.decode_eof(buf))
    }
}

async fn handle_connection(
    state: ServiceState,
    stream: TcpStream,
    mut shutdown: ShutdownHandle,
) -> io::Result<()> {
    let config = state.config();
    let read_timeout = config.admin_read_timeout();

    let (reader, mut writer) = stream.into_split();
    let codec = CommandCodec::new(config.admin_max_line_length());
    let mut lines = FramedRead::new(reader, codec);

    loop {
        let next = tokio::select! {
            biased;

            _ = shutdown.notified() => break,
            next = tokio::time::timeout(read_timeout, lines.next()) => next,
        };

        let line = match next {
            Ok(Some(Ok(CommandLine::Line(line)))) => line,
            Ok(Some(Ok(CommandLine::TooLong))) => {
                writer
                    .write_all(render("ERROR: line too long").as_bytes())
                    .await?;
                continue;
            }
            Ok(Some(Err(error))) => return Err(error),
            Ok(None) => break,
            Err(_) => {
                tally_log::debug!("closing idle admin connection");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match execute(state.aggregator(), state.stats(), line.parse()) {
            Some(body) => writer.write_all(render(&body).as_bytes()).await?,
            None => break,
        }
    }

    writer.shutdown().await
}

async fn refuse_connection(mut stream: TcpStream) {
    stream.write_all(TOO_MANY_CONNECTIONS.as_bytes()).await.ok();
    stream.shutdown().await.ok();
}

/// Serves the line-based admin protocol on a TCP listener.
///
/// Each connection is handled in its own task. The number of concurrent connections is bounded by
/// `admin.max_connections`, additional connections are refused with an error. On shutdown, the
/// listener stops accepting and waits for open connections to close.
#[derive(Debug)]
pub struct AdminService {
    state: ServiceState,
    listener: StdTcpListener,
    shutdown: ShutdownHandle,
}

impl AdminService {
    /// Binds the admin listener to the configured address.
    pub fn new(state: ServiceState, shutdown: ShutdownHandle) -> Result<Self, ServerError> {
        let addr = state.config().admin_addr();
        let listener = StdTcpListener::bind(addr)
            .and_then(|listener| listener.set_nonblocking(true).map(|()| listener))
            .map_err(|source| ServerError::BindFailed { addr, source })?;

        Ok(Self {
            state,
            listener,
            shutdown,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

fn spawn_connection(
    state: ServiceState,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: ShutdownHandle,
    permit: OwnedSemaphorePermit,
) {
    state.stats().incr(AdminCounter::TotalAdminConnections);
    tally_log::debug!(%peer, "accepted admin connection");

    tokio::spawn(async move {
        if let Err(error) = handle_connection(state, stream, shutdown).await {
            tally_log::debug!(%peer, "admin connection failed: {}", LogError(&error));
        }
        drop(permit);
    });
}

async fn run(state: ServiceState, listener: TcpListener, mut shutdown: ShutdownHandle) {
    let max_connections = state
        .config()
        .admin_max_connections()
        .min(u32::MAX as usize);
    let semaphore = Arc::new(Semaphore::new(max_connections));

    loop {
        let accepted = tokio::select! {
            biased;

            _ = shutdown.notified() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(permit) => {
                    spawn_connection(state.clone(), stream, peer, shutdown.clone(), permit);
                }
                Err(_) => {
                    tally_log::warn!(%peer, "refusing admin connection, limit reached");
                    tokio::spawn(refuse_connection(stream));
                }
            },
            Err(error) => {
                tally_log::warn!("failed to accept admin connection: {}", LogError(&error));
            }
        }
    }

    drop(listener);

    if semaphore.acquire_many(max_connections as u32).await.is_ok() {
        tally_log::info!("admin listener closed");
    }
}

impl Service for AdminService {
    fn spawn_handler(self) -> JoinHandle<()> {
        let Self {
            state,
            listener,
            shutdown,
        } = self;

        tokio::spawn(async move {
            let listener = match TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(error) => {
                    tally_log::error!("failed to register admin listener: {}", LogError(&error));
                    return;
                }
            };

            if let Ok(addr) = listener.local_addr() {
                tally_log::info!("accepting admin connections on tcp://{addr}");
            }

            run(state, listener, shutdown).await;
        })
    }
}
