//! Relay configuration.
//!
//! Configs are normally built in code via [`RelayConfig::new`]; TOML loading
//! is available for deployments that prefer a file
//! ([`RelayConfig::from_toml_path`]). The TOML layer deserializes into raw
//! all-optional mirror types and validates into the typed config.
//!
//! # TOML shape
//! ```toml
//! port = 2098
//! password = "changeme"
//! security = "TLS"
//! keys_dir = "/etc/rusty-relay/credentials"
//!
//! [accepted_groups.workers]
//! max_count = 8
//! max_consumables = 100
//! ```
//! Omitting `[accepted_groups]` entirely leaves the relay in open mode.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use rr_protocol::{DEFAULT_HEADER_SIZE, DEFAULT_MAX_FRAME_LEN, Security};

use crate::RelayError;

/// Credentials location when none is configured: the platform user-data
/// directory, subpath `rusty-relay/credentials`.
pub fn default_keys_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("rusty-relay").join("credentials"))
}

// ---------------------------------------------------------------------------
// Group policy
// ---------------------------------------------------------------------------

/// Per-group limits in a restricted policy.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GroupLimits {
    /// Maximum simultaneous members; `None` means unbounded.
    pub max_count: Option<usize>,
    /// Consumable queue cap; oldest entries are dropped when full.
    pub max_consumables: Option<usize>,
}

/// Which group names the relay accepts.
#[derive(Debug, Clone, Default)]
pub enum GroupPolicy {
    /// Accept any group name; groups are created lazily on first reference.
    #[default]
    Open,
    /// Accept only the listed names, each with its limits.
    Restricted(HashMap<String, GroupLimits>),
}

impl GroupPolicy {
    /// An empty restricted policy; add groups with [`GroupPolicy::accept`].
    pub fn restricted() -> Self {
        GroupPolicy::Restricted(HashMap::new())
    }

    /// Add an accepted group. Converts an open policy into a restricted one.
    pub fn accept(self, name: impl Into<String>, limits: GroupLimits) -> Self {
        let mut accepted = match self {
            GroupPolicy::Open => HashMap::new(),
            GroupPolicy::Restricted(accepted) => accepted,
        };
        accepted.insert(name.into(), limits);
        GroupPolicy::Restricted(accepted)
    }

    /// Whether `name` may be referenced at all.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            GroupPolicy::Open => true,
            GroupPolicy::Restricted(accepted) => accepted.contains_key(name),
        }
    }

    /// Limits for `name` (defaults in open mode).
    pub fn limits(&self, name: &str) -> GroupLimits {
        match self {
            GroupPolicy::Open => GroupLimits::default(),
            GroupPolicy::Restricted(accepted) => {
                accepted.get(name).copied().unwrap_or_default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RelayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the listener on.
    pub bind: IpAddr,
    /// Port to listen on; 0 picks an ephemeral port (see `Relay::port`).
    pub port: u16,
    /// Shared password, checked on every peer frame.
    pub password: String,
    pub policy: GroupPolicy,
    /// Width of the ASCII decimal length header; must match the endpoints.
    pub header_size: usize,
    pub max_frame_len: usize,
    pub security: Security,
    /// Directory holding `certificate.pem` and `key.pem`; falls back to the
    /// platform default when `None`.
    pub keys_dir: Option<PathBuf>,
}

impl RelayConfig {
    pub fn new(port: u16, password: impl Into<String>) -> Self {
        RelayConfig {
            bind: IpAddr::from([0, 0, 0, 0]),
            port,
            password: password.into(),
            policy: GroupPolicy::Open,
            header_size: DEFAULT_HEADER_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            security: Security::Tls,
            keys_dir: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), RelayError> {
        if self.password.is_empty() {
            return Err(RelayError::Config("password must not be empty".to_owned()));
        }
        if self.header_size == 0 {
            return Err(RelayError::Config("header_size must be positive".to_owned()));
        }
        Ok(())
    }

    /// Load a config from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RelayError::Config(format!("read {}: {e}", path.as_ref().display())))?;
        let raw: RawRelayConfig =
            toml::from_str(&text).map_err(|e| RelayError::Config(format!("parse: {e}")))?;
        raw.validate()
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawRelayConfig {
    bind: Option<IpAddr>,
    port: Option<u16>,
    password: Option<String>,
    header_size: Option<usize>,
    max_frame_len: Option<usize>,
    security: Option<Security>,
    keys_dir: Option<PathBuf>,
    accepted_groups: Option<HashMap<String, GroupLimits>>,
}

impl RawRelayConfig {
    fn validate(self) -> Result<RelayConfig, RelayError> {
        let port = self
            .port
            .ok_or_else(|| RelayError::Config("missing required field: port".to_owned()))?;
        let password = self
            .password
            .ok_or_else(|| RelayError::Config("missing required field: password".to_owned()))?;
        let mut config = RelayConfig::new(port, password);
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(header_size) = self.header_size {
            config.header_size = header_size;
        }
        if let Some(max_frame_len) = self.max_frame_len {
            config.max_frame_len = max_frame_len;
        }
        if let Some(security) = self.security {
            config.security = security;
        }
        config.keys_dir = self.keys_dir;
        if let Some(accepted) = self.accepted_groups {
            config.policy = GroupPolicy::Restricted(accepted);
        }
        config.validate()?;
        Ok(config)
    }
}
