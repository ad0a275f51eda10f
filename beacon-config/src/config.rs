use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_log::LogConfig;
use beacon_sampling::SampleRate;
use serde::{Deserialize, Serialize};

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// The file extension is neither `yml`, `yaml` nor `json`.
    #[error("unsupported config file format")]
    UnsupportedFormat,
}

/// The source of a [`ConfigError`].
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
}

/// An error that can happen while loading the configuration.
#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
    origin: ConfigErrorSource,
    inner: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            ConfigErrorSource::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorSource::File(path) => write!(f, "{} (file {})", self.kind, path.display()),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.as_deref().map(|e| e as _)
    }
}

impl ConfigError {
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            kind,
            origin: ConfigErrorSource::None,
            inner: None,
        }
    }

    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            origin: ConfigErrorSource::None,
            inner: Some(Box::new(inner)),
        }
    }

    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.origin = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

/// The format of a configuration file, derived from its extension.
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yml" | "yaml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Controls the aggregation of request sessions.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Interval in seconds between two sends of aggregated session counts.
    pub flush_interval: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { flush_interval: 60 }
    }
}

/// Configuration of the telemetry client.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The release version of the instrumented application.
    ///
    /// Required for session tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    /// The environment the application runs in, such as `production`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// The static sample rate for transactions, a boolean or a number between `0` and `1`.
    ///
    /// The value is validated when transactions are started. Tracing is disabled if neither this
    /// nor a traces sampler is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces_sample_rate: Option<SampleRate>,

    /// Whether request sessions are aggregated and sent.
    pub auto_session_tracking: bool,

    /// Session aggregation settings.
    pub sessions: SessionsConfig,

    /// Maximum time in seconds to wait for pending payloads when closing the client.
    pub shutdown_timeout: u64,

    /// Maximum number of breadcrumbs kept on a scope.
    pub max_breadcrumbs: usize,

    /// Logging settings.
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            release: None,
            environment: None,
            traces_sample_rate: None,
            auto_session_tracking: true,
            sessions: SessionsConfig::default(),
            shutdown_timeout: 2,
            max_breadcrumbs: 100,
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from a YAML or JSON file.
    ///
    /// The format is chosen by the file extension: `.yml` and `.yaml` for YAML, `.json` for JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::new(ConfigErrorKind::UnsupportedFormat).file(path))?;

        let file = fs::File::open(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        let reader = io::BufReader::new(file);

        match format {
            ConfigFormat::Yaml => serde_yaml::from_reader(reader)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path)),
            ConfigFormat::Json => serde_json::from_reader(reader)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadJson).file(path)),
        }
    }

    /// Creates a configuration from a JSON value.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadJson))
    }

    /// Returns the interval between two session flushes.
    pub fn session_flush_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.flush_interval)
    }

    /// Returns the maximum time to wait for pending payloads on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
