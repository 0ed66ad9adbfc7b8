//! Configuration system for tern.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TERN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tern/config.toml
//!   3. ~/.config/tern/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Well-known stcp port.
pub const DEFAULT_STCP_PORT: u16 = 4556;
/// Default stcp transmission rate in bytes/sec (90 Mbps).
pub const DEFAULT_TCP_RATE: u64 = 11_250_000;
/// Seconds of idle link between keepalives.
pub const DEFAULT_KEEPALIVE_PERIOD: u32 = 15;
/// Bytes read from the object store per write.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TernConfig {
    pub outducts: Vec<OutductConfig>,
    pub routes: Vec<RouteConfig>,
    pub node: NodeConfig,
    pub stcp: StcpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Administrative endpoint of this node.
    pub local_eid: String,
}

/// Protocol-level settings for the stream convergence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StcpConfig {
    /// Port used when a duct name carries no port.
    pub default_port: u16,
    /// Nominal rate in bytes/sec. 0 = DEFAULT_TCP_RATE.
    pub nominal_rate: u64,
    /// Idle seconds between keepalives.
    pub keepalive_period: u32,
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutductConfig {
    pub protocol: String,
    /// For stcp this is `<host>[:<port>]`.
    pub name: String,
    /// Per-duct rate override. 0 = protocol rate.
    pub nominal_rate: u64,
    /// Admission limit for queued bundle bytes. 0 = unlimited.
    pub max_queued_bytes: u64,
}

/// Static route: destinations starting with `prefix` go to the named duct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    pub protocol: String,
    pub duct: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_eid: "ipn:1.0".to_string(),
        }
    }
}

impl Default for StcpConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_STCP_PORT,
            nominal_rate: DEFAULT_TCP_RATE,
            keepalive_period: DEFAULT_KEEPALIVE_PERIOD,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Default for OutductConfig {
    fn default() -> Self {
        Self {
            protocol: "stcp".to_string(),
            name: String::new(),
            nominal_rate: 0,
            max_queued_bytes: 0,
        }
    }
}

impl StcpConfig {
    /// Rate actually applied when neither duct nor protocol sets one.
    pub fn effective_rate(&self) -> u64 {
        if self.nominal_rate == 0 {
            DEFAULT_TCP_RATE
        } else {
            self.nominal_rate
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tern")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TernConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TernConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TERN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TernConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Outduct entry by protocol and name.
    pub fn outduct(&self, protocol: &str, name: &str) -> Option<&OutductConfig> {
        self.outducts
            .iter()
            .find(|d| d.protocol == protocol && d.name == name)
    }

    /// Apply TERN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TERN_NODE__LOCAL_EID") {
            self.node.local_eid = v;
        }
        if let Ok(v) = std::env::var("TERN_STCP__DEFAULT_PORT") {
            if let Ok(p) = v.parse() {
                self.stcp.default_port = p;
            }
        }
        if let Ok(v) = std::env::var("TERN_STCP__NOMINAL_RATE") {
            if let Ok(r) = v.parse() {
                self.stcp.nominal_rate = r;
            }
        }
        if let Ok(v) = std::env::var("TERN_STCP__KEEPALIVE_PERIOD") {
            if let Ok(p) = v.parse() {
                self.stcp.keepalive_period = p;
            }
        }
    }
}
