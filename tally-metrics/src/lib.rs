//! Metrics protocol and aggregation.
//!
//! This crate contains the statsd wire format parser, the typed in-memory stores that metrics are
//! aggregated into, and the counters describing the health of a running aggregator.
//!
//! # Protocol
//!
//! Clients submit metrics as plain text records, one per line:
//!
//! ```text
//! <bucket>:<value>|<type>[|@<sampling_rate>]
//! ```
//!
//! See [`Metric`] for details on the format and [`ParseMetricError`] for the checks applied to
//! every record.
//!
//! ```
//! use tally_metrics::{Metric, MetricType};
//!
//! let metric = Metric::parse(b"gorets:1|c").expect("metric should parse");
//! assert_eq!(metric.bucket, "gorets");
//! assert_eq!(metric.ty(), MetricType::Counter);
//! ```
//!
//! # Aggregation
//!
//! Parsed metrics are merged into an [`Aggregator`]. It keeps one store per metric type:
//!
//! | type    | code | aggregate                         |
//! |---------|------|-----------------------------------|
//! | counter | `c`  | sum of values scaled by `1/rate`  |
//! | gauge   | `g`  | most recent value                 |
//! | timing  | `ms` | every sample scaled by `1/rate`   |
//! | set     | `s`  | distinct raw values               |
//!
//! ```
//! use tally_metrics::{Aggregator, Metric};
//!
//! let aggregator = Aggregator::default();
//! for metric in Metric::parse_all(b"gorets:1|c\ngorets:1|c|@0.5\n") {
//!     aggregator.insert(metric.expect("metric should parse"));
//! }
//!
//! let report = aggregator.flush();
//! assert_eq!(report.counters, [("gorets".to_owned(), 3)]);
//! ```
#![warn(missing_docs)]

pub mod aggregator;

mod protocol;
mod report;
mod stats;

pub use aggregator::{
    AggregateMetricsError, Aggregator, AggregatorConfig, FlushPolicy, StoreSnapshot,
};
pub use protocol::*;
pub use report::*;
pub use stats::*;
