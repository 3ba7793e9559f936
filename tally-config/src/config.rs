use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_log::LogConfig;
use tally_metrics::AggregatorConfig;

/// Largest payload of a single UDP datagram.
const MAX_UDP_PAYLOAD: usize = 65_507;

type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// Defines the source of a config error
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field, either from the file or from an override.
    Field(&'static str),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<BoxedError>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<BoxedError>,
    {
        Self {
            inner: Some(inner.into()),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::Field(name);
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the name of the offending field, if the error is about a single field.
    pub fn field_name(&self) -> Option<&'static str> {
        match self.source {
            ConfigErrorSource::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => write!(f, "{}", self.kind),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing a JSON config value failed.
    #[error("could not parse json config")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// A configuration object stored as a YAML file.
trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        serde_yaml::to_writer(writer, self)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut f = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The interface the UDP ingest socket binds to.
    pub ingest_host: Option<String>,
    /// The port of the UDP ingest socket.
    pub ingest_port: Option<String>,
    /// The interface the TCP admin listener binds to.
    pub admin_host: Option<String>,
    /// The port of the TCP admin listener.
    pub admin_port: Option<String>,
    /// Seconds between two flushes.
    pub flush_interval: Option<String>,
    /// Seconds to wait for services during a graceful shutdown.
    pub shutdown_timeout: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

/// Settings of the UDP ingest socket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Ingest {
    /// The host the ingest socket should bind to (network interface).
    pub host: IpAddr,
    /// The port to bind for the ingest socket.
    pub port: u16,
    /// The maximum size of a datagram in bytes. Larger datagrams are truncated by the socket.
    pub max_datagram_size: usize,
}

impl Default for Ingest {
    fn default() -> Self {
        Ingest {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8125,
            max_datagram_size: 32 * 1024,
        }
    }
}

/// Settings of the TCP admin channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Admin {
    /// The host the admin listener should bind to (network interface).
    pub host: IpAddr,
    /// The port to bind for the admin listener.
    pub port: u16,
    /// The maximum number of concurrent admin connections.
    pub max_connections: usize,
    /// Seconds an admin connection may stay idle before it is closed.
    pub read_timeout: u64,
    /// The maximum length of a single command line in bytes.
    pub max_line_length: usize,
}

impl Default for Admin {
    fn default() -> Self {
        Admin {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8126,
            max_connections: 64,
            read_timeout: 30,
            max_line_length: 1024,
        }
    }
}

/// Controls internal limits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    /// The maximum number of seconds to wait for pending work after a shutdown was requested.
    pub shutdown_timeout: u64,
    /// The number of runtime worker threads. Defaults to the number of logical CPU cores.
    pub max_thread_count: Option<usize>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            shutdown_timeout: 10,
            max_thread_count: None,
        }
    }
}

/// Minimal version of a config for dumping out.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MinimalConfig {
    /// The ingest part of the config.
    pub ingest: Ingest,
    /// The admin part of the config.
    pub admin: Admin,
}

impl MinimalConfig {
    /// Saves the config in the given config folder as config.yml
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.save(path)
    }
}

impl ConfigObject for MinimalConfig {
    fn name() -> &'static str {
        "config"
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    ingest: Ingest,
    #[serde(default)]
    admin: Admin,
    #[serde(default)]
    aggregator: AggregatorConfig,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    logging: LogConfig,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let config = Config {
            values: ConfigValues::load(&path)?,
            path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let ingest = &mut self.values.ingest;

        if let Some(host) = overrides.ingest_host {
            ingest.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "ingest.host"))?;
        }

        if let Some(port) = overrides.ingest_port {
            ingest.port = port
                .parse::<u16>()
                .map_err(|err| ConfigError::for_field(err, "ingest.port"))?;
        }

        let admin = &mut self.values.admin;

        if let Some(host) = overrides.admin_host {
            admin.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "admin.host"))?;
        }

        if let Some(port) = overrides.admin_port {
            admin.port = port
                .parse::<u16>()
                .map_err(|err| ConfigError::for_field(err, "admin.port"))?;
        }

        if let Some(flush_interval) = overrides.flush_interval {
            self.values.aggregator.flush_interval = flush_interval
                .parse::<u64>()
                .map_err(|err| ConfigError::for_field(err, "aggregator.flush_interval"))?;
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            self.values.limits.shutdown_timeout = shutdown_timeout
                .parse::<u64>()
                .map_err(|err| ConfigError::for_field(err, "limits.shutdown_timeout"))?;
        }

        if let Some(log_level) = overrides.log_level {
            self.values.logging.level = log_level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "logging.level"))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Rejects values that cannot be used to start the server.
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field| ConfigError::new(ConfigErrorKind::InvalidValue).field(field);

        let max_datagram_size = self.values.ingest.max_datagram_size;
        if max_datagram_size == 0 || max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(invalid("ingest.max_datagram_size"));
        }

        if self.values.admin.max_connections == 0 {
            return Err(invalid("admin.max_connections"));
        }

        if self.values.admin.max_line_length == 0 {
            return Err(invalid("admin.max_line_length"));
        }

        if self.values.admin.read_timeout == 0 {
            return Err(invalid("admin.read_timeout"));
        }

        if self.values.aggregator.flush_interval == 0 {
            return Err(invalid("aggregator.flush_interval"));
        }

        Ok(())
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address of the UDP ingest socket.
    pub fn ingest_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.ingest.host, self.values.ingest.port)
    }

    /// Returns the largest datagram the ingest socket reads in one piece.
    pub fn max_datagram_size(&self) -> usize {
        self.values.ingest.max_datagram_size
    }

    /// Returns the socket address of the TCP admin listener.
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.admin.host, self.values.admin.port)
    }

    /// Returns the maximum number of concurrent admin connections.
    pub fn admin_max_connections(&self) -> usize {
        self.values.admin.max_connections
    }

    /// Returns the idle timeout of an admin connection.
    pub fn admin_read_timeout(&self) -> Duration {
        Duration::from_secs(self.values.admin.read_timeout)
    }

    /// Returns the maximum length of an admin command line in bytes.
    pub fn admin_max_line_length(&self) -> usize {
        self.values.admin.max_line_length
    }

    /// Returns the aggregator configuration.
    pub fn aggregator_config(&self) -> &AggregatorConfig {
        &self.values.aggregator
    }

    /// Returns the maximum time to wait for services after a graceful shutdown was requested.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }

    /// Returns the number of runtime worker threads.
    pub fn cpu_concurrency(&self) -> usize {
        self.values
            .limits
            .max_thread_count
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }
}
