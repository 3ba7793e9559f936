use std::fmt;
use std::iter::FusedIterator;

/// Type used for aggregated counter sums.
pub type CounterType = i64;

/// Type used for gauge values.
pub type GaugeType = i64;

/// Type of individual timing samples.
pub type TimingType = i64;

/// Type used for set elements in the set store.
pub type SetType = String;

/// The [typed value](Metric::value) of a metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Counts instances of an event. See [`MetricType::Counter`].
    Counter(f64),
    /// Stores an absolute snapshot of a value. See [`MetricType::Gauge`].
    Gauge(f64),
    /// A single duration observation. See [`MetricType::Timing`].
    Timing(f64),
    /// Counts the number of unique reported values. See [`MetricType::Set`].
    ///
    /// The raw value is kept verbatim. It is never parsed as a number, so `"01"` and `"1"` are
    /// distinct elements.
    Set(SetType),
}

impl MetricValue {
    /// Returns the type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Timing(_) => MetricType::Timing,
            Self::Set(_) => MetricType::Set,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Counter(value) => value.fmt(f),
            MetricValue::Gauge(value) => value.fmt(f),
            MetricValue::Timing(value) => value.fmt(f),
            MetricValue::Set(value) => value.fmt(f),
        }
    }
}

/// The type of a [`MetricValue`], determining its aggregation and evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum MetricType {
    /// Counts instances of an event.
    ///
    /// Counter values are scaled by the inverse sampling rate and summed per bucket.
    Counter,
    /// Stores absolute snapshots of values.
    ///
    /// The newest sample replaces the previous one. Sampling rates do not apply.
    Gauge,
    /// Records individual duration observations.
    ///
    /// Every sample is kept so distributions can be computed from the full sequence.
    Timing,
    /// Counts the number of unique reported values.
    Set,
}

impl MetricType {
    /// All metric types, in report order.
    pub const ALL: [MetricType; 4] = [Self::Counter, Self::Gauge, Self::Timing, Self::Set];

    /// Return the shortcode for this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timing => "ms",
            MetricType::Set => "s",
        }
    }

    /// Returns the singular human-readable name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Timing => "timing",
            MetricType::Set => "set",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "c" => Self::Counter,
            "g" => Self::Gauge,
            "ms" => Self::Timing,
            "s" => Self::Set,
            _ => return Err(ParseMetricError::UnrecognizedType),
        })
    }
}

/// An error returned by [`Metric::parse`] and [`Metric::parse_all`].
///
/// The variants are listed in the order in which the parser checks for them. For a record with
/// several defects, the first failing check determines the error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ParseMetricError {
    /// The record is not valid UTF-8.
    #[error("record is not valid utf-8")]
    InvalidEncoding,
    /// The record is empty or consists only of whitespace.
    #[error("empty record")]
    EmptyRecord,
    /// The record has no `:` separator or an empty bucket name.
    #[error("missing bucket name")]
    MissingBucket,
    /// Nothing follows the bucket name.
    #[error("missing value and type")]
    MissingValueOrType,
    /// The value token is empty.
    #[error("missing value")]
    MissingValue,
    /// The type token is empty.
    #[error("missing metric type")]
    MissingType,
    /// The type token is none of `c`, `g`, `ms`, or `s`.
    #[error("unrecognized metric type")]
    UnrecognizedType,
    /// The value of a numeric metric is not a finite number.
    #[error("invalid metric value")]
    InvalidValue,
    /// The `@` sampling rate is not a positive finite number.
    #[error("invalid sampling rate")]
    InvalidSamplingRate,
}

/// Splits `source` at the first `needle` into a trimmed head and the untrimmed remainder.
fn tokenize(needle: char, source: &str) -> (&str, Option<&str>) {
    match source.split_once(needle) {
        Some((head, rest)) => (head.trim(), Some(rest)),
        None => (source.trim(), None),
    }
}

/// Parses a metric value given its type.
fn parse_value(string: &str, ty: MetricType) -> Result<MetricValue, ParseMetricError> {
    let number = || {
        string
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or(ParseMetricError::InvalidValue)
    };

    Ok(match ty {
        MetricType::Counter => MetricValue::Counter(number()?),
        MetricType::Gauge => MetricValue::Gauge(number()?),
        MetricType::Timing => MetricValue::Timing(number()?),
        MetricType::Set => MetricValue::Set(string.to_owned()),
    })
}

/// Parses the trailing `|`-separated segments after the type.
///
/// The first segment starting with `@` carries the sampling rate. Other segments, such as
/// DogStatsD `#tags`, are ignored.
fn parse_sample_rate(segments: &str) -> Result<f64, ParseMetricError> {
    let Some(raw) = segments
        .split('|')
        .map(str::trim)
        .find_map(|segment| segment.strip_prefix('@'))
    else {
        return Ok(1.0);
    };

    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .ok_or(ParseMetricError::InvalidSamplingRate)
}

/// A single metric sample as sent by a statsd client.
///
/// As opposed to the aggregated stores, a metric always represents a single submission.
///
/// # Submission Protocol
///
/// ```text
/// <bucket>:<value>|<type>[|@<sampling_rate>]
/// ```
///
/// Where `type` is one of `c` (counter), `g` (gauge), `ms` (timing), or `s` (set). Leading and
/// trailing whitespace of the record and of every token is ignored. Some examples:
///
/// ```text
/// gorets:1|c
/// glork:320|ms|@0.1
/// gaugor:333|g
/// uniques:765|s
/// ```
///
/// To parse a datagram with multiple newline-separated records, use [`Metric::parse_all`].
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// The name under which the metric is aggregated.
    pub bucket: String,
    /// The value of the metric.
    ///
    /// Counters, gauges and timings carry a finite number. Sets carry the raw value string.
    pub value: MetricValue,
    /// Fraction of events the client actually sent, in `(0, ∞)`.
    ///
    /// Defaults to `1.0`. Counters and timings are scaled by the inverse of this rate to
    /// extrapolate the true values.
    pub sample_rate: f64,
}

impl Metric {
    /// Returns the type of this metric.
    pub fn ty(&self) -> MetricType {
        self.value.ty()
    }

    fn parse_str(string: &str) -> Result<Self, ParseMetricError> {
        let string = string.trim();
        if string.is_empty() {
            return Err(ParseMetricError::EmptyRecord);
        }

        let (bucket, rest) = match tokenize(':', string) {
            (bucket, Some(rest)) if !bucket.is_empty() => (bucket, rest),
            _ => return Err(ParseMetricError::MissingBucket),
        };

        if rest.trim().is_empty() {
            return Err(ParseMetricError::MissingValueOrType);
        }

        let (value, rest) = tokenize('|', rest);
        if value.is_empty() {
            return Err(ParseMetricError::MissingValue);
        }

        let (ty, rest) = rest.map_or(("", None), |rest| tokenize('|', rest));
        if ty.is_empty() {
            return Err(ParseMetricError::MissingType);
        }

        let ty = ty.parse()?;
        let value = parse_value(value, ty)?;
        let sample_rate = rest.map_or(Ok(1.0), parse_sample_rate)?;

        Ok(Self {
            bucket: bucket.to_owned(),
            value,
            sample_rate,
        })
    }

    /// Parses a single metric from the raw protocol.
    ///
    /// See the [`Metric`] for more information on the protocol.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::{Metric, MetricValue};
    ///
    /// let metric = Metric::parse(b"glork:320|ms|@0.1").expect("metric should parse");
    /// assert_eq!(metric.value, MetricValue::Timing(320.0));
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, ParseMetricError> {
        let string = std::str::from_utf8(slice).or(Err(ParseMetricError::InvalidEncoding))?;
        Self::parse_str(string)
    }

    /// Parses all metrics in a datagram.
    ///
    /// Returns a metric result for each line in `slice`, ignoring blank lines. Both UNIX newlines
    /// (`\n`) and Windows newlines (`\r\n`) are supported.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::Metric;
    ///
    /// let data = b"gorets:1|c\nglork:320|ms|@0.1\n";
    ///
    /// for metric_result in Metric::parse_all(data) {
    ///     let metric = metric_result.expect("metric should parse");
    ///     println!("Metric {}: {}", metric.bucket, metric.value);
    /// }
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseMetrics<'_> {
        ParseMetrics { slice }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}|{}", self.bucket, self.value, self.ty())?;
        if self.sample_rate != 1.0 {
            write!(f, "|@{}", self.sample_rate)?;
        }
        Ok(())
    }
}

/// Iterator over parsed metrics returned from [`Metric::parse_all`].
///
/// Cloning the iterator restarts parsing from its current position.
#[derive(Clone, Debug, Default)]
pub struct ParseMetrics<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseMetrics<'_> {
    type Item = Result<Metric, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let (current, rest) = match self.slice.iter().position(|&b| b == b'\n') {
                Some(index) => (&self.slice[..index], &self.slice[index + 1..]),
                None => (self.slice, &[][..]),
            };
            self.slice = rest;

            if !current.iter().all(u8::is_ascii_whitespace) {
                return Some(Metric::parse(current));
            }
        }
    }
}

impl FusedIterator for ParseMetrics<'_> {}
