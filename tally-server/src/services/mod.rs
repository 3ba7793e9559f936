//! The services making up a Tally server.

mod admin;
mod flush;
mod ingest;

pub use self::admin::{AdminCommand, AdminService, UnknownCommand, execute};
pub use self::flush::FlushService;
pub use self::ingest::{IngestService, IngestSummary, ingest_datagram};
