//! Coordinator configuration.
//!
//! Precedence: CLI flags > environment variables > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use flc_protocol::{
    DEFAULT_LIVENESS_CHECK_INTERVAL_SECS, DEFAULT_LIVENESS_TIMEOUT_SECS, DEFAULT_MAX_CLIENTS,
    DEFAULT_MIN_CLIENTS, DEFAULT_ROUND_TIMEOUT_SECS,
};

/// Top-level configuration, one TOML table per section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener addresses and per-connection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Newline-delimited JSON transport for federation clients.
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,
    /// HTTP status API.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// Client connections served at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Messages queued per connection before broadcasts to it fail.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Round and session policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Quorum: submissions needed before a round aggregates.
    #[serde(default = "default_min_clients")]
    pub min_clients: usize,
    /// Live sessions allowed at once; further registrations are rejected.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Period of the timeout trigger.
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,
    /// Idle time after which a session is evicted.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    /// How often idle sessions are looked for.
    #[serde(default = "default_liveness_check_interval_secs")]
    pub liveness_check_interval_secs: u64,
}

/// Round history database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file, created with its parent directory on startup.
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_rpc_addr() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_http_addr() -> String {
    "127.0.0.1:8766".to_string()
}

fn default_max_connections() -> usize {
    64
}

fn default_outbound_queue() -> usize {
    32
}

fn default_min_clients() -> usize {
    DEFAULT_MIN_CLIENTS
}

fn default_max_clients() -> usize {
    DEFAULT_MAX_CLIENTS
}

fn default_round_timeout_secs() -> u64 {
    DEFAULT_ROUND_TIMEOUT_SECS
}

fn default_liveness_timeout_secs() -> u64 {
    DEFAULT_LIVENESS_TIMEOUT_SECS
}

fn default_liveness_check_interval_secs() -> u64 {
    DEFAULT_LIVENESS_CHECK_INTERVAL_SECS
}

fn default_history_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("flc").join("fl_history.db"))
        .unwrap_or_else(|| PathBuf::from("./fl_history.db"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_addr: default_rpc_addr(),
            http_addr: default_http_addr(),
            max_connections: default_max_connections(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            min_clients: default_min_clients(),
            max_clients: default_max_clients(),
            round_timeout_secs: default_round_timeout_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            liveness_check_interval_secs: default_liveness_check_interval_secs(),
        }
    }
}

impl FederationConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_check_interval_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_path: default_history_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: CoordinatorConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load from `path` if given and present, then apply environment overrides.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!(path = %p.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_vars();
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `FLC_*` overrides from `lookup`.
    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FLC_RPC_ADDR") {
            self.server.rpc_addr = addr;
        }
        if let Some(addr) = lookup("FLC_HTTP_ADDR") {
            self.server.http_addr = addr;
        }
        if let Some(path) = lookup("FLC_HISTORY_PATH") {
            self.storage.history_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.federation;
        if f.min_clients == 0 {
            bail!("federation.min_clients must be at least 1");
        }
        if f.min_clients > f.max_clients {
            bail!(
                "federation.min_clients ({}) exceeds federation.max_clients ({})",
                f.min_clients,
                f.max_clients
            );
        }
        if f.round_timeout_secs == 0 {
            bail!("federation.round_timeout_secs must be non-zero");
        }
        if f.liveness_timeout_secs == 0 || f.liveness_check_interval_secs == 0 {
            bail!("federation liveness timeout and check interval must be non-zero");
        }
        if self.server.outbound_queue == 0 || self.server.max_connections == 0 {
            bail!("server.outbound_queue and server.max_connections must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.federation.min_clients, 2);
        assert_eq!(config.federation.max_clients, 10);
        assert_eq!(config.federation.round_timeout(), Duration::from_secs(300));
        assert_eq!(config.federation.liveness_timeout(), Duration::from_secs(600));
        assert_eq!(config.federation.liveness_check_interval(), Duration::from_secs(60));
        assert!(config.storage.history_path.ends_with("fl_history.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            [federation]
            min_clients = 3

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.federation.min_clients, 3);
        assert_eq!(config.federation.max_clients, 10);
        assert_eq!(config.server.rpc_addr, "127.0.0.1:8765");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_overrides_replace_addresses() {
        let mut config = CoordinatorConfig::default();
        config.apply_overrides(|key| match key {
            "FLC_RPC_ADDR" => Some("0.0.0.0:9000".to_string()),
            "FLC_HISTORY_PATH" => Some("/tmp/h.db".to_string()),
            _ => None,
        });
        assert_eq!(config.server.rpc_addr, "0.0.0.0:9000");
        assert_eq!(config.server.http_addr, "127.0.0.1:8766");
        assert_eq!(config.storage.history_path, PathBuf::from("/tmp/h.db"));
    }

    #[test]
    fn test_validate_rejects_bad_quorum() {
        let mut config = CoordinatorConfig::default();
        config.federation.min_clients = 0;
        assert!(config.validate().is_err());

        config.federation.min_clients = 11;
        assert!(config.validate().is_err());

        config.federation.min_clients = 2;
        config.federation.liveness_check_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.federation, FederationConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flc.toml");
        std::fs::write(&path, "[server]\nmax_connections = 8\n").unwrap();
        let config = CoordinatorConfig::from_file(&path).unwrap();
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.server.outbound_queue, 32);
    }
}
