use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use tally_config::{Config, MinimalConfig, OverridableConfig};

use crate::cliapp::{config_path, make_app};
use crate::healthcheck::healthcheck;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = config_path(&matches);

    // Commands that do not need a loaded config.
    if let Some(("config", config_matches)) = matches.subcommand()
        && let Some(("init", init_matches)) = config_matches.subcommand()
    {
        return init_config(&config_path, init_matches.get_flag("force"));
    }

    let mut config = load_config(&config_path, matches.contains_id("config"))?;

    if let Some(("run", run_matches)) = matches.subcommand() {
        config.apply_override(extract_config_args(run_matches))?;
    }

    tally_log::init(config.logging());

    match matches.subcommand() {
        Some(("run", _)) => run(config),
        Some(("config", config_matches)) => match config_matches.subcommand() {
            Some(("show", _)) => show_config(&config),
            _ => unreachable!(),
        },
        Some(("healthcheck", healthcheck_matches)) => healthcheck(&config, healthcheck_matches),
        _ => unreachable!(),
    }
}

/// Loads the config from `path`.
///
/// A missing default config folder is not an error and yields the default configuration. A
/// missing folder that was passed explicitly is.
fn load_config(path: &Path, explicit: bool) -> Result<Config> {
    if Config::config_exists(path) {
        return Config::from_path(path)
            .with_context(|| format!("could not load config from {}", path.display()));
    }

    if explicit {
        bail!("no config found in {}", path.display());
    }

    Ok(Config::default())
}

/// Extracts config overrides from the command line parameters and environment variables.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let get = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        ingest_host: get("ingest_host"),
        ingest_port: get("ingest_port"),
        admin_host: get("admin_host"),
        admin_port: get("admin_port"),
        flush_interval: get("flush_interval"),
        shutdown_timeout: get("shutdown_timeout"),
        log_level: get("log_level"),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if Config::config_exists(path) && !force {
        bail!(
            "a config already exists in {}, pass --force to overwrite it",
            path.display()
        );
    }

    MinimalConfig::default().save_in_folder(path)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "All done! Wrote config to {}", path.display())?;
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(config.to_yaml_string()?.as_bytes())?;
    Ok(())
}

fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    setup::dump_spawn_infos(&config);
    tally_server::run(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_config_args() {
        let matches = make_app()
            .try_get_matches_from([
                "tally",
                "run",
                "--admin-port",
                "0",
                "--flush-interval",
                "2",
            ])
            .unwrap();
        let (_, run_matches) = matches.subcommand().unwrap();

        let overrides = extract_config_args(run_matches);
        assert_eq!(overrides.admin_port.as_deref(), Some("0"));
        assert_eq!(overrides.flush_interval.as_deref(), Some("2"));

        let mut config = Config::default();
        config.apply_override(overrides).unwrap();
        assert_eq!(config.admin_addr().port(), 0);
        assert_eq!(config.aggregator_config().flush_interval, 2);
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");

        assert!(load_config(&path, false).is_ok());
        assert!(load_config(&path, true).is_err());
    }

    #[test]
    fn test_init_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tally");

        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();

        let config = load_config(&path, true).unwrap();
        assert_eq!(config.path(), path);
        assert_eq!(config.ingest_addr().port(), 8125);
    }
}
