//! Endpoint configuration.
//!
//! Built in code via [`EndpointConfig::new`] or loaded from TOML
//! ([`EndpointConfig::from_toml_path`]) in the raw-deserialize-then-validate
//! style.
//!
//! # TOML shape
//! ```toml
//! host = "relay.example.com"
//! port = 2098
//! password = "changeme"
//! groups = ["workers"]
//! security = "TLS"
//! hostname = "relay.example.com"
//!
//! [reconnect]
//! initial_delay = 10.0
//! max_delay = 60.0
//! factor = 1.5
//! jitter = 0.1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use rr_protocol::{DEFAULT_HEADER_SIZE, DEFAULT_MAX_FRAME_LEN, Security};

use crate::EndpointError;

/// Credentials location when none is configured: the platform user-data
/// directory, subpath `rusty-relay/credentials`.
pub fn default_keys_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("rusty-relay").join("credentials"))
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

/// Exponential backoff parameters for the reconnecting client.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub factor: f64,
    /// Uniform jitter fraction applied to every delay (0.1 = +-10%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            factor: 1.5,
            jitter: 0.1,
        }
    }
}

/// Where received payloads are deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeserializerMode {
    /// Decode on the network worker as payloads arrive; `pop` is cheap.
    #[default]
    Asynchronous,
    /// Queue raw bytes and decode in the calling thread, so decode errors
    /// surface to the caller instead of being logged and dropped.
    Synchronous,
}

// ---------------------------------------------------------------------------
// EndpointConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Relay host name or IP.
    pub host: String,
    pub port: u16,
    /// Shared password, stamped onto every outgoing frame.
    pub password: String,
    /// Groups to declare at handshake.
    pub groups: Vec<String>,
    /// Width of the ASCII decimal length header; must match the relay.
    pub header_size: usize,
    pub max_frame_len: usize,
    /// Socket read chunk size.
    pub max_buf_len: usize,
    pub security: Security,
    /// Directory holding the relay's `certificate.pem` (the trust anchor);
    /// falls back to the platform default when `None`.
    pub keys_dir: Option<PathBuf>,
    /// Server name expected on the relay's TLS certificate.
    pub hostname: String,
    pub reconnect: ReconnectConfig,
    pub deserializer_mode: DeserializerMode,
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        EndpointConfig {
            host: host.into(),
            port,
            password: password.into(),
            groups: vec!["default".to_owned()],
            header_size: DEFAULT_HEADER_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_buf_len: 4096,
            security: Security::Tls,
            keys_dir: None,
            hostname: "default".to_owned(),
            reconnect: ReconnectConfig::default(),
            deserializer_mode: DeserializerMode::default(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), EndpointError> {
        if self.password.is_empty() {
            return Err(EndpointError::Config("password must not be empty".to_owned()));
        }
        if self.header_size == 0 {
            return Err(EndpointError::Config("header_size must be positive".to_owned()));
        }
        if self.max_buf_len == 0 {
            return Err(EndpointError::Config("max_buf_len must be positive".to_owned()));
        }
        if self.reconnect.factor < 1.0 {
            return Err(EndpointError::Config(
                "reconnect factor must be at least 1.0".to_owned(),
            ));
        }
        if !(0.0..1.0).contains(&self.reconnect.jitter) {
            return Err(EndpointError::Config(
                "reconnect jitter must be in [0, 1)".to_owned(),
            ));
        }
        Ok(())
    }

    /// Load a config from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, EndpointError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EndpointError::Config(format!("read {}: {e}", path.as_ref().display()))
        })?;
        let raw: RawEndpointConfig =
            toml::from_str(&text).map_err(|e| EndpointError::Config(format!("parse: {e}")))?;
        raw.validate()
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    groups: Option<Vec<String>>,
    header_size: Option<usize>,
    max_frame_len: Option<usize>,
    max_buf_len: Option<usize>,
    security: Option<Security>,
    keys_dir: Option<PathBuf>,
    hostname: Option<String>,
    deserializer_mode: Option<DeserializerMode>,
    reconnect: Option<RawReconnectConfig>,
}

#[derive(Debug, Deserialize)]
struct RawReconnectConfig {
    initial_delay: Option<f64>,
    max_delay: Option<f64>,
    factor: Option<f64>,
    jitter: Option<f64>,
}

impl RawEndpointConfig {
    fn validate(self) -> Result<EndpointConfig, EndpointError> {
        let host = self
            .host
            .ok_or_else(|| EndpointError::Config("missing required field: host".to_owned()))?;
        let port = self
            .port
            .ok_or_else(|| EndpointError::Config("missing required field: port".to_owned()))?;
        let password = self
            .password
            .ok_or_else(|| EndpointError::Config("missing required field: password".to_owned()))?;
        let mut config = EndpointConfig::new(host, port, password);
        if let Some(groups) = self.groups {
            config.groups = groups;
        }
        if let Some(header_size) = self.header_size {
            config.header_size = header_size;
        }
        if let Some(max_frame_len) = self.max_frame_len {
            config.max_frame_len = max_frame_len;
        }
        if let Some(max_buf_len) = self.max_buf_len {
            config.max_buf_len = max_buf_len;
        }
        if let Some(security) = self.security {
            config.security = security;
        }
        config.keys_dir = self.keys_dir;
        if let Some(hostname) = self.hostname {
            config.hostname = hostname;
        }
        if let Some(mode) = self.deserializer_mode {
            config.deserializer_mode = mode;
        }
        if let Some(raw) = self.reconnect {
            let mut reconnect = ReconnectConfig::default();
            if let Some(secs) = raw.initial_delay {
                reconnect.initial_delay = Duration::from_secs_f64(secs);
            }
            if let Some(secs) = raw.max_delay {
                reconnect.max_delay = Duration::from_secs_f64(secs);
            }
            if let Some(factor) = raw.factor {
                reconnect.factor = factor;
            }
            if let Some(jitter) = raw.jitter {
                reconnect.jitter = jitter;
            }
            config.reconnect = reconnect;
        }
        config.validate()?;
        Ok(config)
    }
}
