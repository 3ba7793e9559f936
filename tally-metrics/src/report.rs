use std::fmt;

use crate::aggregator::StoreSnapshot;
use crate::protocol::{CounterType, GaugeType, MetricType, TimingType};

fn sorted<V>(entries: impl IntoIterator<Item = (String, V)>) -> Vec<(String, V)> {
    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// The rendered result of one flush.
///
/// Every section is sorted by bucket name. Sets are reduced to their cardinality.
///
/// The [`Display`](fmt::Display) implementation renders one line per bucket, followed by the
/// number of buckets reported for that type:
///
/// ```text
/// counter gorets 13
/// counters: 1
/// gauges: 0
/// timing glork 320 5
/// timings: 1
/// set uniq 2
/// sets: 1
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    /// Counter sums.
    pub counters: Vec<(String, CounterType)>,
    /// Latest gauge values.
    pub gauges: Vec<(String, GaugeType)>,
    /// Timing samples in arrival order.
    pub timings: Vec<(String, Vec<TimingType>)>,
    /// Number of distinct values per set.
    pub sets: Vec<(String, usize)>,
}

impl Report {
    /// Replaces the section of the snapshot's type with the snapshot contents.
    pub fn merge(&mut self, snapshot: StoreSnapshot) {
        match snapshot {
            StoreSnapshot::Counters(map) => self.counters = sorted(map),
            StoreSnapshot::Gauges(map) => self.gauges = sorted(map),
            StoreSnapshot::Timings(map) => self.timings = sorted(map),
            StoreSnapshot::Sets(map) => {
                self.sets = sorted(map.into_iter().map(|(k, v)| (k, v.len())));
            }
        }
    }

    /// Returns the number of buckets reported for the given type.
    pub fn len(&self, ty: MetricType) -> usize {
        match ty {
            MetricType::Counter => self.counters.len(),
            MetricType::Gauge => self.gauges.len(),
            MetricType::Timing => self.timings.len(),
            MetricType::Set => self.sets.len(),
        }
    }

    /// Returns the total number of buckets across all types.
    pub fn bucket_count(&self) -> usize {
        MetricType::ALL.iter().map(|ty| self.len(*ty)).sum()
    }

    /// Returns `true` if no type reported any bucket.
    pub fn is_empty(&self) -> bool {
        self.bucket_count() == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bucket, sum) in &self.counters {
            writeln!(f, "counter {bucket} {sum}")?;
        }
        writeln!(f, "counters: {}", self.counters.len())?;

        for (bucket, value) in &self.gauges {
            writeln!(f, "gauge {bucket} {value}")?;
        }
        writeln!(f, "gauges: {}", self.gauges.len())?;

        for (bucket, samples) in &self.timings {
            write!(f, "timing {bucket}")?;
            for sample in samples {
                write!(f, " {sample}")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "timings: {}", self.timings.len())?;

        for (bucket, count) in &self.sets {
            writeln!(f, "set {bucket} {count}")?;
        }
        write!(f, "sets: {}", self.sets.len())
    }
}
