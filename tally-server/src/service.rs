use std::fmt;
use std::sync::Arc;

use tally_config::Config;
use tally_metrics::{AdminStats, Aggregator};

/// Shared state of all services.
///
/// The aggregator and the admin counters are created once per server and shared by reference
/// with every service. Cloning the state is cheap.
#[derive(Clone)]
pub struct ServiceState {
    config: Arc<Config>,
    aggregator: Arc<Aggregator>,
    stats: Arc<AdminStats>,
}

impl ServiceState {
    /// Creates the state for a server with empty stores and zeroed counters.
    pub fn new(config: Arc<Config>) -> Self {
        let aggregator = Aggregator::new(config.aggregator_config());

        Self {
            config,
            aggregator: Arc::new(aggregator),
            stats: Arc::new(AdminStats::new()),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the aggregator receiving all ingested metrics.
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Returns the admin counters.
    pub fn stats(&self) -> &AdminStats {
        &self.stats
    }
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("aggregator", &self.aggregator)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
