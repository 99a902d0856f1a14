//! Configuration system for relay.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RELAY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/relay/config.toml
//!   3. ~/.config/relay/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{
    DEFAULT_BACKLOG, DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_ADDR, DISCOVERY_INTERVAL_SECS,
    DISCOVERY_RECV_TIMEOUT_SECS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub node: NodeConfig,
    pub discovery: DiscoveryConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Registry id of this node's own server peer.
    pub id: String,
    /// Address the server peer binds to.
    pub listen_ip: String,
    /// TCP port the server peer listens on. 0 = OS-assigned.
    pub listen_port: u16,
    pub backlog: u32,
    /// Receive timeout applied to accepted clients. 0 = block until data.
    pub client_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Multicast group shared by all instances.
    pub multicast_ip: String,
    /// UDP port shared by all instances.
    pub port: u16,
    /// Local bind address for the discovery socket.
    pub local_ip: String,
    /// Interface address used to join the group and send requests.
    /// Empty = let the kernel choose.
    pub interface: String,
    pub interval_secs: u64,
    pub receive_timeout_secs: u64,
    /// TCP port to dial on discovered hosts. 0 = use the discovered port.
    pub dial_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Peers idle for longer than this are evicted. 0 = never.
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level when RUST_LOG is unset.
    pub level: LogLevel,
    /// Append log lines to this file as well as the console.
    pub file: Option<PathBuf>,
    /// How many recent ERROR events to keep for diagnostics.
    pub recent_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local control API port (127.0.0.1 only).
    pub port: u16,
}

/// Log severity, as named in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by tracing's env filter.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            // tracing has no level above ERROR
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 8082,
            backlog: DEFAULT_BACKLOG,
            client_timeout_secs: 2,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_ip: DEFAULT_MULTICAST_ADDR.to_string(),
            port: DEFAULT_DISCOVERY_PORT,
            local_ip: "0.0.0.0".to_string(),
            interface: String::new(),
            interval_secs: DISCOVERY_INTERVAL_SECS,
            receive_timeout_secs: DISCOVERY_RECV_TIMEOUT_SECS,
            dial_port: 0,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 300,
            sweep_interval_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            recent_errors: 100,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9101 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("relay")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn default_node_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .map(|h| format!("{h}-relay"))
        .unwrap_or_else(|| "relay-node".to_string())
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

impl RelayConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            RelayConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a specific config file, without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RELAY_CONFIG")
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
            let text = toml::to_string_pretty(&RelayConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RELAY_* overrides. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RELAY_NODE__ID") {
            self.node.id = v;
        }
        if let Some(p) = lookup("RELAY_NODE__LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.node.listen_port = p;
        }
        if let Some(v) = lookup("RELAY_DISCOVERY__ENABLED") {
            self.discovery.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RELAY_DISCOVERY__MULTICAST_IP") {
            self.discovery.multicast_ip = v;
        }
        if let Some(p) = lookup("RELAY_DISCOVERY__PORT").and_then(|v| v.parse().ok()) {
            self.discovery.port = p;
        }
        if let Some(level) = lookup("RELAY_LOGGING__LEVEL").and_then(|v| v.parse().ok()) {
            self.logging.level = level;
        }
        if let Some(v) = lookup("RELAY_LOGGING__FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        if let Some(p) = lookup("RELAY_API__PORT").and_then(|v| v.parse().ok()) {
            self.api.port = p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_values() {
        let config = RelayConfig::default();
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.multicast_ip, DEFAULT_MULTICAST_ADDR);
        assert_eq!(config.discovery.interval_secs, 5);
        assert_eq!(config.node.backlog, 5);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.recent_errors, 100);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("RELAY_NODE__ID", "alpha"),
            ("RELAY_NODE__LISTEN_PORT", "9999"),
            ("RELAY_DISCOVERY__ENABLED", "0"),
            ("RELAY_LOGGING__LEVEL", "warning"),
            ("RELAY_API__PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.node.id, "alpha");
        assert_eq!(config.node.listen_port, 9999);
        assert!(!config.discovery.enabled);
        assert_eq!(config.logging.level, LogLevel::Warning);
        // unparsable values leave the default in place
        assert_eq!(config.api.port, 9101);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [node]
            id = "edge-1"

            [logging]
            level = "critical"
            "#,
        )
        .unwrap();

        assert_eq!(config.node.id, "edge-1");
        assert_eq!(config.node.listen_port, 8082);
        assert_eq!(config.logging.level, LogLevel::Critical);
        assert_eq!(config.logging.level.as_directive(), "error");
        assert_eq!(config.discovery.port, DEFAULT_DISCOVERY_PORT);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&RelayConfig::default()).unwrap();
        let parsed: RelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.discovery.multicast_ip, DEFAULT_MULTICAST_ADDR);
        assert_eq!(parsed.registry.sweep_interval_secs, 10);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("relay-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("RELAY_CONFIG", config_path.to_str().unwrap());
        }

        let path = RelayConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = RelayConfig::from_file(&path).expect("load should succeed");
        assert!(config.discovery.enabled);

        unsafe {
            std::env::remove_var("RELAY_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
