//! Core aggregation logic.
//!
//! The [`Aggregator`] holds one store per [`MetricType`]. Every store sits behind its own lock,
//! so writers of different types never contend with each other.

use std::mem;
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    CounterType, GaugeType, Metric, MetricType, MetricValue, SetType, TimingType,
};
use crate::report::Report;

/// Aggregated counter sums per bucket.
pub type Counters = HashMap<String, CounterType>;

/// Latest gauge value per bucket.
pub type Gauges = HashMap<String, GaugeType>;

/// All timing samples per bucket, in arrival order.
pub type Timings = HashMap<String, Vec<TimingType>>;

/// Distinct set elements per bucket.
pub type Sets = HashMap<String, HashSet<SetType>>;

/// Any error that may occur during aggregation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum AggregateMetricsError {
    /// A metric was passed to the operation of another metric type.
    #[error("found incompatible metric types: expected {expected}, got {actual}")]
    InvalidType {
        /// The type accepted by the called operation.
        expected: MetricType,
        /// The type of the submitted metric.
        actual: MetricType,
    },
}

/// Controls which stores are cleared after every flush.
///
/// A store with its flag disabled is reported cumulatively. Gauges always keep their last value
/// and have no flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlushPolicy {
    /// Reset counter sums after a flush.
    pub reset_counters: bool,
    /// Discard reported timing samples after a flush.
    pub reset_timings: bool,
    /// Discard reported set elements after a flush.
    pub reset_sets: bool,
}

impl FlushPolicy {
    /// A policy that never resets any store.
    pub const fn cumulative() -> Self {
        Self {
            reset_counters: false,
            reset_timings: false,
            reset_sets: false,
        }
    }

    /// Returns `true` if the store of the given type is cleared after a flush.
    pub fn resets(&self, ty: MetricType) -> bool {
        match ty {
            MetricType::Counter => self.reset_counters,
            MetricType::Gauge => false,
            MetricType::Timing => self.reset_timings,
            MetricType::Set => self.reset_sets,
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            reset_counters: true,
            reset_timings: true,
            reset_sets: true,
        }
    }
}

/// Parameters used by the [`Aggregator`] and its flush loop.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Seconds between two flushes.
    ///
    /// Defaults to `10`.
    pub flush_interval: u64,

    /// Which stores are cleared after a flush.
    pub flush_policy: FlushPolicy,
}

impl AggregatorConfig {
    /// Returns the flush interval as [`Duration`].
    ///
    /// An interval of zero is raised to one second.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval.max(1))
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10,
            flush_policy: FlushPolicy::default(),
        }
    }
}

/// A point-in-time copy of one typed store.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreSnapshot {
    /// Contents of the counter store.
    Counters(Counters),
    /// Contents of the gauge store.
    Gauges(Gauges),
    /// Contents of the timing store.
    Timings(Timings),
    /// Contents of the set store.
    Sets(Sets),
}

impl StoreSnapshot {
    /// Returns the metric type of the copied store.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counters(_) => MetricType::Counter,
            Self::Gauges(_) => MetricType::Gauge,
            Self::Timings(_) => MetricType::Timing,
            Self::Sets(_) => MetricType::Set,
        }
    }

    /// Returns the number of buckets in this snapshot.
    pub fn len(&self) -> usize {
        match self {
            Self::Counters(map) => map.len(),
            Self::Gauges(map) => map.len(),
            Self::Timings(map) => map.len(),
            Self::Sets(map) => map.len(),
        }
    }

    /// Returns `true` if the snapshot contains no buckets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the snapshot contains the given bucket.
    pub fn contains(&self, bucket: &str) -> bool {
        match self {
            Self::Counters(map) => map.contains_key(bucket),
            Self::Gauges(map) => map.contains_key(bucket),
            Self::Timings(map) => map.contains_key(bucket),
            Self::Sets(map) => map.contains_key(bucket),
        }
    }
}

/// Scales a sampled value by the inverse of its rate and rounds to the nearest integer.
///
/// Out-of-range results saturate at the bounds of `i64`.
fn extrapolate(value: f64, sample_rate: f64) -> i64 {
    let sample_rate = if sample_rate.is_finite() && sample_rate > 0.0 {
        sample_rate
    } else {
        1.0
    };

    (value / sample_rate).round() as i64
}

fn take_or_clone<T: Clone + Default>(lock: &RwLock<T>, reset: bool) -> T {
    if reset {
        mem::take(&mut *lock.write())
    } else {
        lock.read().clone()
    }
}

fn drain_buckets<V>(lock: &RwLock<HashMap<String, V>>) -> Vec<String> {
    let store = mem::take(&mut *lock.write());
    let mut buckets: Vec<String> = store.into_keys().collect();
    buckets.sort_unstable();
    buckets
}

/// A collector of [`Metric`] submissions.
///
/// # Aggregation
///
/// Each metric is dispatched into the store of its type and merged with other submissions of the
/// same bucket:
///
/// - Counters are summed after scaling by the inverse sampling rate.
/// - Gauges keep the most recent value.
/// - Timings append every scaled sample.
/// - Sets keep distinct raw values.
///
/// # Flushing
///
/// [`Aggregator::flush`] copies all stores into a [`Report`]. Depending on the [`FlushPolicy`],
/// counters, timings and sets are cleared in the same critical section, so no submission is lost
/// or reported twice.
#[derive(Debug, Default)]
pub struct Aggregator {
    policy: FlushPolicy,
    counters: RwLock<Counters>,
    gauges: RwLock<Gauges>,
    timings: RwLock<Timings>,
    sets: RwLock<Sets>,
}

impl Aggregator {
    /// Creates a new empty aggregator from its configuration.
    pub fn new(config: &AggregatorConfig) -> Self {
        Self::with_policy(config.flush_policy)
    }

    /// Creates a new empty aggregator with the given flush policy.
    pub fn with_policy(policy: FlushPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Returns the flush policy of this aggregator.
    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    fn add_counter(&self, bucket: String, value: f64, sample_rate: f64) {
        let delta = extrapolate(value, sample_rate);
        let mut counters = self.counters.write();
        let sum = counters.entry(bucket).or_default();
        *sum = sum.saturating_add(delta);
    }

    fn set_gauge(&self, bucket: String, value: f64) {
        self.gauges.write().insert(bucket, value.round() as GaugeType);
    }

    fn push_timing(&self, bucket: String, value: f64, sample_rate: f64) {
        let sample = extrapolate(value, sample_rate);
        self.timings.write().entry(bucket).or_default().push(sample);
    }

    fn add_set(&self, bucket: String, value: SetType) {
        self.sets.write().entry(bucket).or_default().insert(value);
    }

    /// Adds a counter metric to the counter store.
    pub fn process_counter(&self, metric: Metric) -> Result<(), AggregateMetricsError> {
        match metric.value {
            MetricValue::Counter(value) => {
                self.add_counter(metric.bucket, value, metric.sample_rate);
                Ok(())
            }
            other => Err(AggregateMetricsError::InvalidType {
                expected: MetricType::Counter,
                actual: other.ty(),
            }),
        }
    }

    /// Replaces the value of a gauge bucket.
    pub fn process_gauge(&self, metric: Metric) -> Result<(), AggregateMetricsError> {
        match metric.value {
            MetricValue::Gauge(value) => {
                self.set_gauge(metric.bucket, value);
                Ok(())
            }
            other => Err(AggregateMetricsError::InvalidType {
                expected: MetricType::Gauge,
                actual: other.ty(),
            }),
        }
    }

    /// Appends a timing sample to its bucket.
    pub fn process_timing(&self, metric: Metric) -> Result<(), AggregateMetricsError> {
        match metric.value {
            MetricValue::Timing(value) => {
                self.push_timing(metric.bucket, value, metric.sample_rate);
                Ok(())
            }
            other => Err(AggregateMetricsError::InvalidType {
                expected: MetricType::Timing,
                actual: other.ty(),
            }),
        }
    }

    /// Records a set element in its bucket.
    pub fn process_set(&self, metric: Metric) -> Result<(), AggregateMetricsError> {
        match metric.value {
            MetricValue::Set(value) => {
                self.add_set(metric.bucket, value);
                Ok(())
            }
            other => Err(AggregateMetricsError::InvalidType {
                expected: MetricType::Set,
                actual: other.ty(),
            }),
        }
    }

    /// Routes a metric into the store of its type and returns that type.
    pub fn insert(&self, metric: Metric) -> MetricType {
        let Metric {
            bucket,
            value,
            sample_rate,
        } = metric;

        match value {
            MetricValue::Counter(value) => {
                self.add_counter(bucket, value, sample_rate);
                MetricType::Counter
            }
            MetricValue::Gauge(value) => {
                self.set_gauge(bucket, value);
                MetricType::Gauge
            }
            MetricValue::Timing(value) => {
                self.push_timing(bucket, value, sample_rate);
                MetricType::Timing
            }
            MetricValue::Set(value) => {
                self.add_set(bucket, value);
                MetricType::Set
            }
        }
    }

    /// Returns a copy of one store without modifying it.
    pub fn snapshot(&self, ty: MetricType) -> StoreSnapshot {
        match ty {
            MetricType::Counter => StoreSnapshot::Counters(self.counters.read().clone()),
            MetricType::Gauge => StoreSnapshot::Gauges(self.gauges.read().clone()),
            MetricType::Timing => StoreSnapshot::Timings(self.timings.read().clone()),
            MetricType::Set => StoreSnapshot::Sets(self.sets.read().clone()),
        }
    }

    /// Returns the contents of one store and clears it if the flush policy says so.
    ///
    /// Gauges are never cleared.
    pub fn snapshot_and_reset(&self, ty: MetricType) -> StoreSnapshot {
        let reset = self.policy.resets(ty);
        match ty {
            MetricType::Counter => StoreSnapshot::Counters(take_or_clone(&self.counters, reset)),
            MetricType::Gauge => StoreSnapshot::Gauges(take_or_clone(&self.gauges, reset)),
            MetricType::Timing => StoreSnapshot::Timings(take_or_clone(&self.timings, reset)),
            MetricType::Set => StoreSnapshot::Sets(take_or_clone(&self.sets, reset)),
        }
    }

    /// Removes all buckets of one store and returns their sorted names.
    pub fn clear(&self, ty: MetricType) -> Vec<String> {
        match ty {
            MetricType::Counter => drain_buckets(&self.counters),
            MetricType::Gauge => drain_buckets(&self.gauges),
            MetricType::Timing => drain_buckets(&self.timings),
            MetricType::Set => drain_buckets(&self.sets),
        }
    }

    /// Snapshots every store and renders the result into a [`Report`].
    pub fn flush(&self) -> Report {
        let mut report = Report::default();
        for ty in MetricType::ALL {
            report.merge(self.snapshot_and_reset(ty));
        }

        tally_log::trace!(buckets = report.bucket_count(), "flushed aggregator");
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use similar_asserts::assert_eq;

    use super::*;

    fn metric(s: &str) -> Metric {
        Metric::parse(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_counter_sums() {
        let aggregator = Aggregator::default();
        aggregator.process_counter(metric("gorets:1|c")).unwrap();
        aggregator.process_counter(metric("gorets:2|c")).unwrap();
        aggregator.process_counter(metric("gorets:1|c|@0.1")).unwrap();

        let StoreSnapshot::Counters(counters) = aggregator.snapshot(MetricType::Counter) else {
            panic!("expected counters");
        };
        assert_eq!(counters.get("gorets"), Some(&13));
    }

    #[test]
    fn test_counter_rounds() {
        let aggregator = Aggregator::default();
        aggregator.process_counter(metric("a:1|c|@0.3")).unwrap();
        aggregator.process_counter(metric("a:-1.5|c")).unwrap();

        let StoreSnapshot::Counters(counters) = aggregator.snapshot(MetricType::Counter) else {
            panic!("expected counters");
        };
        // round(3.33) + round(-1.5)
        assert_eq!(counters.get("a"), Some(&1));
    }

    #[test]
    fn test_counter_saturates() {
        let aggregator = Aggregator::default();
        aggregator.process_counter(metric("big:1e300|c")).unwrap();
        aggregator.process_counter(metric("big:1e300|c")).unwrap();

        let StoreSnapshot::Counters(counters) = aggregator.snapshot(MetricType::Counter) else {
            panic!("expected counters");
        };
        assert_eq!(counters.get("big"), Some(&i64::MAX));
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let aggregator = Aggregator::default();
        aggregator.process_gauge(metric("gaugor:333|g")).unwrap();
        aggregator.process_gauge(metric("gaugor:12.6|g|@0.5")).unwrap();

        let StoreSnapshot::Gauges(gauges) = aggregator.snapshot(MetricType::Gauge) else {
            panic!("expected gauges");
        };
        assert_eq!(gauges.get("gaugor"), Some(&13));
    }

    #[test]
    fn test_timing_keeps_samples_in_order() {
        let aggregator = Aggregator::default();
        aggregator.process_timing(metric("glork:320|ms")).unwrap();
        aggregator.process_timing(metric("glork:32|ms|@0.1")).unwrap();
        aggregator.process_timing(metric("glork:5|ms")).unwrap();

        let StoreSnapshot::Timings(timings) = aggregator.snapshot(MetricType::Timing) else {
            panic!("expected timings");
        };
        assert_eq!(timings.get("glork"), Some(&vec![320, 320, 5]));
    }

    #[test]
    fn test_set_counts_distinct() {
        let aggregator = Aggregator::default();
        for value in ["abc", "def", "abc", "1", "01"] {
            let m = metric(&format!("uniq:{value}|s"));
            aggregator.process_set(m).unwrap();
        }

        let StoreSnapshot::Sets(sets) = aggregator.snapshot(MetricType::Set) else {
            panic!("expected sets");
        };
        assert_eq!(sets.get("uniq").map(HashSet::len), Some(4));
    }

    #[test]
    fn test_invalid_type_leaves_stores_untouched() {
        let aggregator = Aggregator::default();
        let error = aggregator.process_counter(metric("gaugor:1|g")).unwrap_err();

        assert_eq!(
            error,
            AggregateMetricsError::InvalidType {
                expected: MetricType::Counter,
                actual: MetricType::Gauge,
            }
        );
        assert_eq!(
            error.to_string(),
            "found incompatible metric types: expected c, got g"
        );

        for ty in MetricType::ALL {
            assert!(aggregator.snapshot(ty).is_empty());
        }
    }

    #[test]
    fn test_insert_routes_by_type() {
        let aggregator = Aggregator::default();
        let types: Vec<MetricType> = Metric::parse_all(b"a:1|c\nb:3|g\nc:5|ms\nd:x|s\n")
            .map(|m| aggregator.insert(m.unwrap()))
            .collect();

        assert_eq!(types, MetricType::ALL);

        let expected = [
            (MetricType::Counter, "a"),
            (MetricType::Gauge, "b"),
            (MetricType::Timing, "c"),
            (MetricType::Set, "d"),
        ];

        for (ty, bucket) in expected {
            let snapshot = aggregator.snapshot(ty);
            assert_eq!(snapshot.len(), 1);
            assert!(snapshot.contains(bucket), "{bucket} missing in {ty}");
        }
    }

    #[test]
    fn test_bucket_stays_in_its_store() {
        let aggregator = Aggregator::default();
        aggregator.insert(metric("shared:1|c"));
        aggregator.insert(metric("other:1|g"));

        assert!(aggregator.snapshot(MetricType::Counter).contains("shared"));
        assert!(!aggregator.snapshot(MetricType::Gauge).contains("shared"));
        assert!(!aggregator.snapshot(MetricType::Timing).contains("shared"));
        assert!(!aggregator.snapshot(MetricType::Set).contains("shared"));
    }

    #[test]
    fn test_concurrent_counters_sum_exactly() {
        let aggregator = Arc::new(Aggregator::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        aggregator.process_counter(metric("hits:1|c")).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let StoreSnapshot::Counters(counters) = aggregator.snapshot(MetricType::Counter) else {
            panic!("expected counters");
        };
        assert_eq!(counters.get("hits"), Some(&8000));
    }

    #[test]
    fn test_concurrent_mixed_types() {
        let aggregator = Arc::new(Aggregator::default());

        let handles: Vec<_> = ["t:1|ms", "s:x|s", "g:1|g", "c:1|c"]
            .into_iter()
            .map(|line| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..500 {
                        aggregator.insert(metric(line));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let StoreSnapshot::Timings(timings) = aggregator.snapshot(MetricType::Timing) else {
            panic!("expected timings");
        };
        assert_eq!(timings.get("t").map(Vec::len), Some(500));
    }

    #[test]
    fn test_snapshot_and_reset() {
        let aggregator = Aggregator::default();
        for line in ["a:1|c", "b:3|g", "c:5|ms", "d:x|s"] {
            aggregator.insert(metric(line));
        }

        for ty in MetricType::ALL {
            assert_eq!(aggregator.snapshot_and_reset(ty).len(), 1);
        }

        assert!(aggregator.snapshot_and_reset(MetricType::Counter).is_empty());
        assert!(aggregator.snapshot_and_reset(MetricType::Timing).is_empty());
        assert!(aggregator.snapshot_and_reset(MetricType::Set).is_empty());

        let StoreSnapshot::Gauges(gauges) = aggregator.snapshot_and_reset(MetricType::Gauge) else {
            panic!("expected gauges");
        };
        assert_eq!(gauges.get("b"), Some(&3));
    }

    #[test]
    fn test_cumulative_policy_retains() {
        let aggregator = Aggregator::with_policy(FlushPolicy::cumulative());
        aggregator.insert(metric("a:1|c"));
        aggregator.flush();
        aggregator.insert(metric("a:1|c"));

        let StoreSnapshot::Counters(counters) = aggregator.snapshot_and_reset(MetricType::Counter)
        else {
            panic!("expected counters");
        };
        assert_eq!(counters.get("a"), Some(&2));
    }

    #[test]
    fn test_partial_policy() {
        let policy = FlushPolicy {
            reset_timings: false,
            ..FlushPolicy::default()
        };
        let aggregator = Aggregator::with_policy(policy);
        aggregator.insert(metric("a:1|c"));
        aggregator.insert(metric("t:1|ms"));
        aggregator.flush();

        assert!(aggregator.snapshot(MetricType::Counter).is_empty());
        assert_eq!(aggregator.snapshot(MetricType::Timing).len(), 1);
    }

    #[test]
    fn test_clear_returns_sorted_buckets() {
        let aggregator = Aggregator::default();
        for line in ["zeta:1|c", "alpha:1|c", "mid:1|c", "other:1|g"] {
            aggregator.insert(metric(line));
        }

        assert_eq!(aggregator.clear(MetricType::Counter), ["alpha", "mid", "zeta"]);
        assert!(aggregator.snapshot(MetricType::Counter).is_empty());
        assert_eq!(aggregator.snapshot(MetricType::Gauge).len(), 1);
        assert!(aggregator.clear(MetricType::Set).is_empty());
    }

    #[test]
    fn test_flush_resets_windows() {
        tally_test::setup();

        let aggregator = Aggregator::default();
        aggregator.insert(metric("a:1|c"));
        aggregator.insert(metric("g:7|g"));

        let first = aggregator.flush();
        assert_eq!(first.bucket_count(), 2);

        let second = aggregator.flush();
        assert_eq!(second.counters.len(), 0);
        assert_eq!(second.gauges, [("g".to_owned(), 7)]);
    }

    #[test]
    fn test_config_defaults() {
        let config: AggregatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.flush_policy, FlushPolicy::default());

        let config: AggregatorConfig = serde_json::from_str(
            r#"{"flush_interval": 0, "flush_policy": {"reset_sets": false}}"#,
        )
        .unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert!(config.flush_policy.reset_counters);
        assert!(!config.flush_policy.resets(MetricType::Set));
        assert!(!config.flush_policy.resets(MetricType::Gauge));
    }
}
