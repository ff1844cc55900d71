use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use exporter_log::{Level, LogConfig};
use exporter_metrics::{MappingConfig, MappingTable};
use serde::{Deserialize, Serialize};

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
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
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: Some(Box::new(inner)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => write!(f, "{}", self.kind),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
    /// The mapping table could not be loaded.
    #[error("could not load mapping config")]
    BadMapping,
}

fn default_listen_addr() -> Option<SocketAddr> {
    Some(SocketAddr::from(([0, 0, 0, 0], 9125)))
}

/// Network listeners.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Listen {
    /// Address of the UDP listener, or `None` to disable it.
    pub udp: Option<SocketAddr>,
    /// Address of the TCP listener, or `None` to disable it.
    pub tcp: Option<SocketAddr>,
    /// Maximum size of a UDP datagram in bytes.
    pub udp_buffer_size: usize,
    /// Size of the kernel receive buffer of the UDP socket. Uses the system default if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_read_buffer: Option<usize>,
    /// Longest accepted TCP line in bytes, without the newline.
    pub tcp_line_buffer_size: usize,
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            udp: default_listen_addr(),
            tcp: default_listen_addr(),
            udp_buffer_size: 65535,
            udp_read_buffer: None,
            tcp_line_buffer_size: 4096,
        }
    }
}

/// The queue between listeners and the dispatcher.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Queue {
    /// Number of event batches buffered before listeners block.
    pub capacity: usize,
}

impl Default for Queue {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Location of the mapping table.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Mapping {
    /// Path to the mapping YAML, relative to the config file.
    pub path: Option<PathBuf>,
}

/// The raw contents of the configuration file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigValues {
    /// Network listeners.
    pub listen: Listen,
    /// Event queue.
    pub queue: Queue,
    /// Logging.
    pub logging: LogConfig,
    /// Mapping table.
    pub mapping: Mapping,
}

/// Command line overrides for the configuration.
#[derive(Clone, Debug, Default)]
pub struct OverridableConfig {
    /// The UDP listen address. An empty string or `off` disables the listener.
    pub udp: Option<String>,
    /// The TCP listen address. An empty string or `off` disables the listener.
    pub tcp: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
    /// Path to the mapping table.
    pub mapping: Option<String>,
}

fn parse_listen_addr(value: &str, field: &'static str) -> Result<Option<SocketAddr>, ConfigError> {
    match value {
        "" | "off" => Ok(None),
        addr => addr
            .parse()
            .map(Some)
            .map_err(|err| ConfigError::for_field(err, field)),
    }
}

/// Exporter configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl Config {
    /// Loads the configuration from a YAML file.
    ///
    /// An empty file yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;

        let mut config = Self::from_yaml_str(&contents).map_err(|e| e.file(path))?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Parses the configuration from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let values = if yaml.trim().is_empty() {
            ConfigValues::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?
        };

        Ok(Self {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from the command line.
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let listen = &mut self.values.listen;

        if let Some(udp) = overrides.udp {
            listen.udp = parse_listen_addr(&udp, "udp")?;
        }

        if let Some(tcp) = overrides.tcp {
            listen.tcp = parse_listen_addr(&tcp, "tcp")?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(mapping) = overrides.mapping {
            // Paths from the command line are relative to the working directory.
            let path = env::current_dir()
                .map(|dir| dir.join(&mapping))
                .unwrap_or_else(|_| PathBuf::from(mapping));
            self.values.mapping.path = Some(path);
        }

        Ok(self)
    }

    /// Returns the path of the loaded configuration file, empty if not loaded from a file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw configuration values.
    pub fn values(&self) -> &ConfigValues {
        &self.values
    }

    /// Serializes the effective configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the UDP listen address, if enabled.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.values.listen.udp
    }

    /// Returns the TCP listen address, if enabled.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.values.listen.tcp
    }

    /// Returns the maximum size of a UDP datagram.
    pub fn udp_buffer_size(&self) -> usize {
        self.values.listen.udp_buffer_size
    }

    /// Returns the requested kernel receive buffer size for UDP.
    pub fn udp_read_buffer(&self) -> Option<usize> {
        self.values.listen.udp_read_buffer
    }

    /// Returns the longest accepted TCP line.
    pub fn tcp_line_buffer_size(&self) -> usize {
        self.values.listen.tcp_line_buffer_size
    }

    /// Returns the number of batches the event queue holds.
    pub fn queue_capacity(&self) -> usize {
        self.values.queue.capacity
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the path of the mapping table, resolved against the config file's directory.
    pub fn mapping_path(&self) -> Option<PathBuf> {
        let path = self.values.mapping.path.as_ref()?;
        let base = self.path.parent().unwrap_or(Path::new(""));
        Some(base.join(path))
    }

    /// Loads the mapping table.
    ///
    /// Without a configured path, returns an empty table.
    pub fn load_mapping(&self) -> Result<MappingTable, ConfigError> {
        let Some(path) = self.mapping_path() else {
            return Ok(MappingTable::default());
        };

        let contents = fs::read_to_string(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        let config = if contents.trim().is_empty() {
            MappingConfig::default()
        } else {
            MappingConfig::from_yaml_str(&contents)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadMapping).file(&path))?
        };

        MappingTable::new(config)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadMapping).file(&path))
    }
}
