use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use mirror_http::connection::ConnectionConfig;
use mirror_http::diagnostics::DEFAULT_CAPACITY;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("invalid config: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// Connections are tasks on the shared runtime.
    #[default]
    Pooled,
    /// Every connection gets its own thread running a current thread runtime.
    Dedicated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub address: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl ListenerConfig {
    pub fn plain<A: Into<String>>(address: A) -> Self {
        Self { address: address.into(), tls: None }
    }

    pub fn tls<A: Into<String>>(address: A, certificate: PathBuf, private_key: PathBuf) -> Self {
        Self { address: address.into(), tls: Some(TlsConfig { certificate, private_key }) }
    }
}

/// The server configuration file.
///
/// Every key is optional except the `address` of each `[[listeners]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub header_timeout_ms: u64,
    pub body_timeout_ms: u64,
    pub io_mode: IoMode,
    pub diagnostics_capacity: usize,
    pub max_header_size: usize,
    pub max_message_size: usize,
    pub listeners: Vec<ListenerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            header_timeout_ms: duration_ms(connection.header_timeout),
            body_timeout_ms: duration_ms(connection.body_timeout),
            io_mode: IoMode::default(),
            diagnostics_capacity: DEFAULT_CAPACITY,
            max_header_size: connection.max_header_size,
            max_message_size: connection.max_message_size,
            listeners: Vec::new(),
        }
    }
}

impl FromStr for ServerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ServerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        content.parse()
    }

    /// The limits and timeouts applied to every connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            header_timeout: Duration::from_millis(self.header_timeout_ms),
            body_timeout: Duration::from_millis(self.body_timeout_ms),
            max_header_size: self.max_header_size,
            max_message_size: self.max_message_size,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.header_timeout_ms == 0 || self.body_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than 0".to_string()));
        }
        if self.max_header_size == 0 {
            return Err(ConfigError::Invalid("max_header_size must be greater than 0".to_string()));
        }
        if let Some(listener) = self.listeners.iter().find(|listener| listener.address.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("listener address is empty: {listener:?}")));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
