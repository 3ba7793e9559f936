use std::time::{SystemTime, UNIX_EPOCH};

use tally_metrics::{MetricType, Report};
use tally_system::{Service, ShutdownHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::service::ServiceState;

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

/// Periodically flushes the aggregator and emits a [`Report`].
///
/// Every `aggregator.flush_interval` the service takes a snapshot of all stores, logs the rendered
/// report, forwards it to the optional receiver and records the flush time in the admin counters.
/// When a shutdown is requested, a final flush is performed before the service stops.
#[derive(Debug)]
pub struct FlushService {
    state: ServiceState,
    shutdown: ShutdownHandle,
    receiver: Option<mpsc::UnboundedSender<Report>>,
}

impl FlushService {
    /// Creates a new flush service.
    pub fn new(state: ServiceState, shutdown: ShutdownHandle) -> Self {
        Self {
            state,
            shutdown,
            receiver: None,
        }
    }

    /// Returns a channel that receives every report in addition to logging it.
    ///
    /// Subscribing again replaces the previous channel.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Report> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.receiver = Some(tx);
        rx
    }

    fn flush(&mut self) {
        let report = self.state.aggregator().flush();
        self.state.stats().set_last_flush(unix_timestamp());

        tally_log::info!(
            counters = report.len(MetricType::Counter),
            gauges = report.len(MetricType::Gauge),
            timings = report.len(MetricType::Timing),
            sets = report.len(MetricType::Set),
            "flushing metrics"
        );

        for line in report.to_string().lines() {
            tally_log::info!(target: "tally::report", "{line}");
        }

        if let Some(ref receiver) = self.receiver {
            if receiver.send(report).is_err() {
                tally_log::debug!("report receiver closed");
                self.receiver = None;
            }
        }
    }

    async fn run(mut self) {
        let period = self.state.config().aggregator_config().flush_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tally_log::info!("flushing every {}s", period.as_secs());

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => self.flush(),
            }
        }

        self.flush();
        tally_log::info!("flush service stopped");
    }
}

impl Service for FlushService {
    fn spawn_handler(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tally_config::Config;
    use tally_metrics::Metric;
    use tally_system::Controller;

    use super::*;

    fn state(flush_interval: u64) -> ServiceState {
        let config = Config::from_json_value(serde_json::json!({
            "aggregator": {"flush_interval": flush_interval}
        }))
        .unwrap();
        ServiceState::new(Arc::new(config))
    }

    fn insert(state: &ServiceState, data: &[u8]) {
        for metric in Metric::parse_all(data) {
            state.aggregator().insert(metric.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_interval() {
        tally_test::setup();

        let controller = Controller::new();
        let state = state(10);
        let mut service = FlushService::new(state.clone(), controller.handle());
        let mut rx = service.subscribe();
        let handle = service.start();

        insert(&state, b"gorets:1|c\ngaugor:5|g\n");

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(state.stats().last_flush(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let report = rx.recv().await.unwrap();
        assert_eq!(report.counters, [("gorets".to_owned(), 1)]);
        assert_eq!(report.gauges, [("gaugor".to_owned(), 5)]);
        assert!(state.stats().last_flush() > 0);

        // Counters were reset, gauges persist into the next window.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let report = rx.recv().await.unwrap();
        assert!(report.counters.is_empty());
        assert_eq!(report.gauges, [("gaugor".to_owned(), 5)]);

        controller.shutdown(None);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_flush_on_shutdown() {
        let controller = Controller::new();
        let state = state(60);
        let mut service = FlushService::new(state.clone(), controller.handle());
        let mut rx = service.subscribe();
        let handle = service.start();

        insert(&state, b"glork:320|ms\nuniq:a|s\n");
        tokio::time::sleep(Duration::from_secs(1)).await;

        controller.shutdown(Some(Duration::from_secs(5)));
        handle.await.unwrap();

        let report = rx.recv().await.unwrap();
        assert_eq!(report.timings, [("glork".to_owned(), vec![320])]);
        assert_eq!(report.sets, [("uniq".to_owned(), 1)]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_receiver_keeps_flushing() {
        let controller = Controller::new();
        let state = state(1);
        let mut service = FlushService::new(state.clone(), controller.handle());
        drop(service.subscribe());
        let handle = service.start();

        insert(&state, b"gorets:1|c\n");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(state.aggregator().snapshot(MetricType::Counter).is_empty());

        controller.shutdown(None);
        handle.await.unwrap();
    }
}
