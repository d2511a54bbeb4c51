//! Loader Configuration Settings
//!
//! Configuration types for the loader, read from environment variables.
//! Unset or unparsable values fall back to their defaults; values that
//! parse but cannot work (zero workers, no contact points) are rejected.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{GatewaySettings, PipelineSettings, WriteRetryPolicy};

/// Which store implementation to write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Cassandra-compatible cluster over CQL.
    #[default]
    Scylla,
    /// In-process maps; nothing is persisted.
    Memory,
}

impl StoreBackend {
    /// Parse backend from string. Unknown values select the CQL store.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            _ => Self::Scylla,
        }
    }

    /// Backend name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scylla => "scylla",
            Self::Memory => "memory",
        }
    }
}

/// Connection settings for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Store implementation.
    pub backend: StoreBackend,
    /// Seed hosts, with or without a `:port` suffix.
    pub contact_points: Vec<String>,
    /// CQL native protocol port for hosts without one.
    pub port: u16,
    /// Keyspace holding the reference tables.
    pub keyspace: String,
    /// Timeout for establishing each connection.
    pub connect_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            contact_points: vec!["localhost".to_string()],
            port: 9042,
            keyspace: "datastax_referencedata_demo".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreSettings {
    /// Contact points as `host:port` strings.
    #[must_use]
    pub fn known_nodes(&self) -> Vec<String> {
        self.contact_points
            .iter()
            .map(|host| {
                if has_port(host) {
                    host.clone()
                } else if host.contains(':') && !host.starts_with('[') {
                    format!("[{host}]:{}", self.port)
                } else {
                    format!("{host}:{}", self.port)
                }
            })
            .collect()
    }
}

/// `host:port` or `[v6]:port`. A bare IPv6 literal has no port.
fn has_port(host: &str) -> bool {
    let port = if host.starts_with('[') {
        host.rsplit_once("]:").map(|(_, port)| port)
    } else if host.matches(':').count() == 1 {
        host.rsplit_once(':').map(|(_, port)| port)
    } else {
        None
    };
    port.is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Write completion and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSettings {
    /// Per-batch completion timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Retries for a transiently failed write.
    pub retries: u32,
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            retries: 2,
        }
    }
}

impl WriteSettings {
    /// Gateway settings carrying these values.
    #[must_use]
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            write_timeout: self.timeout,
            retry: WriteRetryPolicy::with_retries(self.retries),
        }
    }
}

/// Where input files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSettings {
    /// Directory scanned for price and dividend files.
    pub csv_dir: PathBuf,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("data/csv"),
        }
    }
}

/// Complete loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Store connection.
    pub store: StoreSettings,
    /// Write completion and retries.
    pub writes: WriteSettings,
    /// Pipeline sizing.
    pub pipeline: PipelineSettings,
    /// Input location.
    pub input: InputSettings,
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            writes: WriteSettings::default(),
            pipeline: PipelineSettings::default(),
            input: InputSettings::default(),
            metrics_port: 0,
        }
    }
}

impl LoaderConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader(lookup);
        let defaults = Self::default();

        let contact_points: Vec<String> = env
            .get("REFDATA_CONTACT_POINTS")
            .map_or(defaults.store.contact_points, |raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(str::to_string)
                    .collect()
            });
        if contact_points.is_empty() {
            return Err(ConfigError::EmptyValue("REFDATA_CONTACT_POINTS".to_string()));
        }

        let keyspace = env
            .get("REFDATA_KEYSPACE")
            .unwrap_or(defaults.store.keyspace);
        if keyspace.trim().is_empty() {
            return Err(ConfigError::EmptyValue("REFDATA_KEYSPACE".to_string()));
        }

        let store = StoreSettings {
            backend: env
                .get("REFDATA_STORE_BACKEND")
                .map(|s| StoreBackend::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            contact_points,
            port: env.parse_or("REFDATA_STORE_PORT", defaults.store.port),
            keyspace,
            connect_timeout: Duration::from_secs(env.parse_or(
                "REFDATA_CONNECT_TIMEOUT_SECS",
                defaults.store.connect_timeout.as_secs(),
            )),
        };

        let timeout_secs: u64 = env.parse_or(
            "REFDATA_WRITE_TIMEOUT_SECS",
            defaults.writes.timeout.map_or(0, |t| t.as_secs()),
        );
        let writes = WriteSettings {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            retries: env.parse_or("REFDATA_WRITE_RETRIES", defaults.writes.retries),
        };

        let workers = env.parse_or("REFDATA_WORKERS", defaults.pipeline.workers);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REFDATA_WORKERS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let channel_capacity =
            env.parse_or("REFDATA_CHANNEL_CAPACITY", defaults.pipeline.channel_capacity);
        if channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REFDATA_CHANNEL_CAPACITY".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let pipeline = PipelineSettings {
            workers,
            channel_capacity,
            load_dividends: env.flag_or("REFDATA_LOAD_DIVIDENDS", defaults.pipeline.load_dividends),
            progress_interval: Duration::from_secs(env.parse_or(
                "REFDATA_PROGRESS_INTERVAL_SECS",
                defaults.pipeline.progress_interval.as_secs(),
            )),
        };

        let input = InputSettings {
            csv_dir: env
                .get("REFDATA_CSV_DIR")
                .map_or(defaults.input.csv_dir, PathBuf::from),
        };

        Ok(Self {
            store,
            writes,
            pipeline,
            input,
            metrics_port: env.parse_or("REFDATA_METRICS_PORT", defaults.metrics_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable parsed but is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag_or(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }
}
