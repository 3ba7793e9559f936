use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::protocol::MetricType;

/// A named counter tracked by [`AdminStats`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AdminCounter {
    /// Every record seen by the ingest listener, valid or not.
    TotalRecords,
    /// Records rejected by the parser or the aggregator.
    BadRecords,
    /// Accepted counter records.
    CountersReceived,
    /// Accepted gauge records.
    GaugesReceived,
    /// Accepted timing records.
    TimersReceived,
    /// Accepted set records.
    SetsReceived,
    /// `counters` admin commands.
    DumpCountersRequests,
    /// `timers` admin commands.
    DumpTimersRequests,
    /// `gauges` admin commands.
    DumpGaugesRequests,
    /// `sets` admin commands.
    DumpSetsRequests,
    /// `delcounters` admin commands.
    DelCountersRequests,
    /// `deltimers` admin commands.
    DelTimersRequests,
    /// `delgauges` admin commands.
    DelGaugesRequests,
    /// `delsets` admin commands.
    DelSetsRequests,
    /// `health` admin commands.
    HealthRequests,
    /// Accepted admin connections.
    TotalAdminConnections,
}

impl AdminCounter {
    const COUNT: usize = 16;

    /// Returns the counter for accepted records of the given type.
    pub fn received(ty: MetricType) -> Self {
        match ty {
            MetricType::Counter => Self::CountersReceived,
            MetricType::Gauge => Self::GaugesReceived,
            MetricType::Timing => Self::TimersReceived,
            MetricType::Set => Self::SetsReceived,
        }
    }

    /// Returns the counter for dump commands of the given type.
    pub fn dump(ty: MetricType) -> Self {
        match ty {
            MetricType::Counter => Self::DumpCountersRequests,
            MetricType::Gauge => Self::DumpGaugesRequests,
            MetricType::Timing => Self::DumpTimersRequests,
            MetricType::Set => Self::DumpSetsRequests,
        }
    }

    /// Returns the counter for delete commands of the given type.
    pub fn delete(ty: MetricType) -> Self {
        match ty {
            MetricType::Counter => Self::DelCountersRequests,
            MetricType::Gauge => Self::DelGaugesRequests,
            MetricType::Timing => Self::DelTimersRequests,
            MetricType::Set => Self::DelSetsRequests,
        }
    }

    /// Returns the field name of this counter in [`AdminStatsSnapshot`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::TotalRecords => "total_records",
            Self::BadRecords => "bad_records",
            Self::CountersReceived => "counters_received",
            Self::GaugesReceived => "gauges_received",
            Self::TimersReceived => "timers_received",
            Self::SetsReceived => "sets_received",
            Self::DumpCountersRequests => "dump_counters_requests",
            Self::DumpTimersRequests => "dump_timers_requests",
            Self::DumpGaugesRequests => "dump_gauges_requests",
            Self::DumpSetsRequests => "dump_sets_requests",
            Self::DelCountersRequests => "delcounters_requests",
            Self::DelTimersRequests => "deltimers_requests",
            Self::DelGaugesRequests => "delgauges_requests",
            Self::DelSetsRequests => "delsets_requests",
            Self::HealthRequests => "health_requests",
            Self::TotalAdminConnections => "total_admin_connections",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Process-wide operational counters.
///
/// All operations are lock-free and may be called from any number of tasks.
#[derive(Debug, Default)]
pub struct AdminStats {
    counters: [AtomicU64; AdminCounter::COUNT],
    last_flush: AtomicU64,
}

impl AdminStats {
    /// Creates a new set of counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn incr(&self, counter: AdminCounter) {
        self.add(counter, 1);
    }

    /// Increments a counter by `value`.
    pub fn add(&self, counter: AdminCounter, value: u64) {
        self.counters[counter.index()].fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value of a counter.
    pub fn get(&self, counter: AdminCounter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Counts a record that was accepted into the store of `ty`.
    pub fn incr_received(&self, ty: MetricType) {
        self.incr(AdminCounter::received(ty));
    }

    /// Counts a dump command for the store of `ty`.
    pub fn incr_dump(&self, ty: MetricType) {
        self.incr(AdminCounter::dump(ty));
    }

    /// Counts a delete command for the store of `ty`.
    pub fn incr_delete(&self, ty: MetricType) {
        self.incr(AdminCounter::delete(ty));
    }

    /// Records the unix timestamp in seconds of the latest flush.
    pub fn set_last_flush(&self, timestamp: u64) {
        self.last_flush.store(timestamp, Ordering::Relaxed);
    }

    /// Returns the unix timestamp of the latest flush, or `0` before the first flush.
    pub fn last_flush(&self) -> u64 {
        self.last_flush.load(Ordering::Relaxed)
    }

    /// Reads all counters into a serializable snapshot.
    ///
    /// Counters are read individually, so the snapshot is not atomic across fields.
    pub fn snapshot(&self) -> AdminStatsSnapshot {
        use AdminCounter::*;

        AdminStatsSnapshot {
            total_records: self.get(TotalRecords),
            bad_records: self.get(BadRecords),
            counters_received: self.get(CountersReceived),
            gauges_received: self.get(GaugesReceived),
            timers_received: self.get(TimersReceived),
            sets_received: self.get(SetsReceived),
            dump_counters_requests: self.get(DumpCountersRequests),
            dump_timers_requests: self.get(DumpTimersRequests),
            dump_gauges_requests: self.get(DumpGaugesRequests),
            dump_sets_requests: self.get(DumpSetsRequests),
            delcounters_requests: self.get(DelCountersRequests),
            deltimers_requests: self.get(DelTimersRequests),
            delgauges_requests: self.get(DelGaugesRequests),
            delsets_requests: self.get(DelSetsRequests),
            health_requests: self.get(HealthRequests),
            last_flush_timestamp: self.last_flush(),
            total_admin_connections: self.get(TotalAdminConnections),
        }
    }
}

/// A point-in-time copy of [`AdminStats`], as returned by the `stats` admin command.
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct AdminStatsSnapshot {
    pub total_records: u64,
    pub bad_records: u64,
    pub counters_received: u64,
    pub gauges_received: u64,
    pub timers_received: u64,
    pub sets_received: u64,
    pub dump_counters_requests: u64,
    pub dump_timers_requests: u64,
    pub dump_gauges_requests: u64,
    pub dump_sets_requests: u64,
    pub delcounters_requests: u64,
    pub deltimers_requests: u64,
    pub delgauges_requests: u64,
    pub delsets_requests: u64,
    pub health_requests: u64,
    pub last_flush_timestamp: u64,
    pub total_admin_connections: u64,
}

impl AdminStatsSnapshot {
    /// Serializes the snapshot into an indented JSON object.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_counter_names_match_snapshot_fields() {
        let stats = AdminStats::new();
        let all = [
            AdminCounter::TotalRecords,
            AdminCounter::BadRecords,
            AdminCounter::CountersReceived,
            AdminCounter::GaugesReceived,
            AdminCounter::TimersReceived,
            AdminCounter::SetsReceived,
            AdminCounter::DumpCountersRequests,
            AdminCounter::DumpTimersRequests,
            AdminCounter::DumpGaugesRequests,
            AdminCounter::DumpSetsRequests,
            AdminCounter::DelCountersRequests,
            AdminCounter::DelTimersRequests,
            AdminCounter::DelGaugesRequests,
            AdminCounter::DelSetsRequests,
            AdminCounter::HealthRequests,
            AdminCounter::TotalAdminConnections,
        ];
        assert_eq!(all.len(), AdminCounter::COUNT);

        for (index, counter) in all.iter().enumerate() {
            stats.add(*counter, index as u64 + 1);
        }

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        for (index, counter) in all.iter().enumerate() {
            assert_eq!(json[counter.name()], index as u64 + 1, "{}", counter.name());
        }
    }

    #[test]
    fn test_typed_helpers() {
        let stats = AdminStats::new();
        stats.incr_received(MetricType::Timing);
        stats.incr_dump(MetricType::Set);
        stats.incr_delete(MetricType::Gauge);
        stats.incr_delete(MetricType::Gauge);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.timers_received, 1);
        assert_eq!(snapshot.dump_sets_requests, 1);
        assert_eq!(snapshot.delgauges_requests, 2);
        assert_eq!(snapshot.counters_received, 0);
    }

    #[test]
    fn test_snapshot_json() {
        let stats = AdminStats::new();
        stats.incr(AdminCounter::TotalRecords);
        stats.incr(AdminCounter::TotalRecords);
        stats.incr(AdminCounter::BadRecords);
        stats.incr_received(MetricType::Counter);
        stats.incr(AdminCounter::HealthRequests);
        stats.set_last_flush(1_700_000_000);

        insta::assert_json_snapshot!(stats.snapshot(), @r###"
        {
          "total_records": 2,
          "bad_records": 1,
          "counters_received": 1,
          "gauges_received": 0,
          "timers_received": 0,
          "sets_received": 0,
          "dump_counters_requests": 0,
          "dump_timers_requests": 0,
          "dump_gauges_requests": 0,
          "dump_sets_requests": 0,
          "delcounters_requests": 0,
          "deltimers_requests": 0,
          "delgauges_requests": 0,
          "delsets_requests": 0,
          "health_requests": 1,
          "last_flush_timestamp": 1700000000,
          "total_admin_connections": 0
        }
        "###);
    }

    #[test]
    fn test_last_flush_starts_at_zero() {
        let stats = AdminStats::new();
        assert_eq!(stats.snapshot().last_flush_timestamp, 0);
        let json = stats.snapshot().to_json_pretty().unwrap();
        assert!(json.contains("\"last_flush_timestamp\": 0,"));
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(AdminStats::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.incr(AdminCounter::TotalRecords);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.get(AdminCounter::TotalRecords), 4000);
    }
}
