//! This module implements the definition of the command line app.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command, value_parser};

pub fn make_app() -> Command {
    Command::new("tally")
        .about("A statsd-style metrics aggregation server.")
        .version(env!("CARGO_PKG_VERSION"))
        .max_term_width(79)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("CONFIG")
                .value_parser(ValueParser::path_buf())
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the tally server")
                .after_help(
                    "This runs the server in the foreground until it's shut down.  It will bind \
                    to the ingest and admin ports configured in the config file, or to the ports \
                    given with the flags below.",
                )
                .arg(
                    Arg::new("ingest_host")
                        .value_name("HOST")
                        .long("ingest-host")
                        .env("TALLY_INGEST_HOST")
                        .help("The host the UDP ingest socket binds to."),
                )
                .arg(
                    Arg::new("ingest_port")
                        .value_name("PORT")
                        .long("ingest-port")
                        .env("TALLY_INGEST_PORT")
                        .help("The port the UDP ingest socket binds to."),
                )
                .arg(
                    Arg::new("admin_host")
                        .value_name("HOST")
                        .long("admin-host")
                        .env("TALLY_ADMIN_HOST")
                        .help("The host the TCP admin listener binds to."),
                )
                .arg(
                    Arg::new("admin_port")
                        .value_name("PORT")
                        .long("admin-port")
                        .env("TALLY_ADMIN_PORT")
                        .help("The port the TCP admin listener binds to."),
                )
                .arg(
                    Arg::new("flush_interval")
                        .value_name("SECONDS")
                        .long("flush-interval")
                        .env("TALLY_FLUSH_INTERVAL")
                        .help("Seconds between two flushes of the aggregator."),
                )
                .arg(
                    Arg::new("shutdown_timeout")
                        .value_name("SECONDS")
                        .long("shutdown-timeout")
                        .env("TALLY_SHUTDOWN_TIMEOUT")
                        .help("Seconds to wait for services during a graceful shutdown."),
                )
                .arg(
                    Arg::new("log_level")
                        .value_name("LEVEL")
                        .long("log-level")
                        .env("TALLY_LOG_LEVEL")
                        .help("The log level: error, warn, info, debug or trace."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the tally config")
                .after_help(
                    "This command provides basic config management.  It can be \
                     used primarily to initialize a new config file and to inspect \
                     the effective configuration.",
                )
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("init")
                        .about("Initialize a new tally config")
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .short('f')
                                .action(ArgAction::SetTrue)
                                .help("Overwrite an existing config file."),
                        ),
                )
                .subcommand(Command::new("show").about("Show the entire effective config")),
        )
        .subcommand(
            Command::new("healthcheck")
                .about("Ask a running tally server for its health")
                .after_help(
                    "Connects to the admin channel and sends the health command.  Exits with \
                     status 1 if the server cannot be reached or reports anything other than \
                     being up.",
                )
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .value_name("ADDR")
                        .value_parser(value_parser!(SocketAddr))
                        .help("The admin address to connect to. Defaults to the configured one."),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(u64))
                        .default_value("5")
                        .help("Seconds to wait for a reply."),
                ),
        )
}

/// Returns the config folder, falling back to `.tally` in the working directory.
pub fn config_path(matches: &clap::ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(".tally"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_definition() {
        make_app().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let matches = make_app()
            .try_get_matches_from([
                "tally",
                "run",
                "--ingest-port",
                "9125",
                "--log-level",
                "debug",
                "-c",
                "/etc/tally",
            ])
            .unwrap();

        assert_eq!(config_path(&matches), PathBuf::from("/etc/tally"));

        let (name, run) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(
            run.get_one::<String>("ingest_port").map(String::as_str),
            Some("9125")
        );
        assert_eq!(
            run.get_one::<String>("log_level").map(String::as_str),
            Some("debug")
        );
    }

    #[test]
    fn test_healthcheck_defaults() {
        let matches = make_app()
            .try_get_matches_from(["tally", "healthcheck"])
            .unwrap();

        assert_eq!(config_path(&matches), PathBuf::from(".tally"));

        let (_, healthcheck) = matches.subcommand().unwrap();
        assert_eq!(healthcheck.get_one::<u64>("timeout"), Some(&5));
        assert_eq!(healthcheck.get_one::<SocketAddr>("addr"), None);
    }

    #[test]
    fn test_invalid_addr() {
        let result =
            make_app().try_get_matches_from(["tally", "healthcheck", "--addr", "localhost"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_subcommand() {
        assert!(make_app().try_get_matches_from(["tally"]).is_err());
    }
}
