use anyhow::Result;
use tally_config::Config;

/// Checks the configuration before the server starts.
pub fn check_config(config: &Config) -> Result<()> {
    // UDP and TCP may share a port, but a shared address is usually a typo.
    if config.ingest_addr() == config.admin_addr() && config.ingest_addr().port() != 0 {
        tally_log::warn!(
            "ingest and admin are both configured on {}",
            config.ingest_addr()
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally without config folder");
    } else {
        tally_log::info!(
            "launching tally from config folder {}",
            config.path().display()
        );
    }

    let aggregator = config.aggregator_config();
    let policy = &aggregator.flush_policy;

    tally_log::info!("  ingest: udp://{}", config.ingest_addr());
    tally_log::info!("  admin: tcp://{}", config.admin_addr());
    tally_log::info!("  flush interval: {}s", aggregator.flush_interval().as_secs());
    tally_log::info!(
        "  reset on flush: counters={} timings={} sets={}",
        policy.reset_counters,
        policy.reset_timings,
        policy.reset_sets
    );
    tally_log::info!("  shutdown timeout: {}s", config.shutdown_timeout().as_secs());
    tally_log::info!("  worker threads: {}", config.cpu_concurrency());
    tally_log::info!("  log level: {}", config.logging().level);
}
