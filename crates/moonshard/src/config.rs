//! Server configuration.
//!
//! Loaded from a TOML file where every section and key is optional:
//!
//! ```toml
//! [cluster]
//! shard_count = 3
//! base_port = 5000
//!
//! [limits]
//! max_connections = 500
//!
//! [timing]
//! sync_interval_secs = 10
//!
//! [upstream]
//! authority_url = "ws://10.0.0.5:5004/sessions"
//! gateway_url = "ws://10.0.0.6:8090/ws"
//! ```
//!
//! The typed configs consumed by the lower crates ([`StoreConfig`],
//! [`SyncConfig`], [`AuthorityConfig`]) are derived from this one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use moonshard_authority::{AuthorityConfig, DirectoryConfig};
use moonshard_session::StoreConfig;
use moonshard_sync::SyncConfig;
use serde::Deserialize;

/// Names handed to the first shards; later shards are `Instance{n}`.
const SHARD_NAMES: [&str; 5] = ["Alpha", "Beta", "Gamma", "Delta", "Epsilon"];

/// Errors raised while loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MoonshardConfig {
    pub cluster: ClusterConfig,
    pub limits: LimitsConfig,
    pub timing: TimingConfig,
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
    pub authority: AuthoritySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name of the cluster, used in logs.
    pub name: String,
    /// Interface every shard listens on.
    pub host: String,
    /// Shard `i` listens on `base_port + i`.
    pub base_port: u16,
    pub shard_count: usize,
    /// Overrides the default shard names, in shard order.
    pub shard_names: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "moonshard".into(),
            host: "0.0.0.0".into(),
            base_port: 5000,
            shard_count: 1,
            shard_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Accepted connections per shard.
    pub max_connections: usize,
    /// Connections waiting for a slot per shard.
    pub max_queued_connections: usize,
    /// Admitted sessions per shard.
    pub max_sessions: usize,
    /// Sessions waiting for a slot per shard.
    pub max_queued_sessions: usize,
    /// Largest upload accepted, in bytes.
    pub max_file_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_queued_connections: 100,
            max_sessions: 10_000,
            max_queued_sessions: 1_000,
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

/// Every interval and grace period, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub sync_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub session_grace_secs: u64,
    pub connection_grace_secs: u64,
    pub status_interval_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            cleanup_interval_secs: 60,
            session_grace_secs: 600,
            connection_grace_secs: 60,
            status_interval_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// The authority's `/sessions` endpoint.
    pub authority_url: String,
    /// Where status reports go. `None` logs them instead.
    pub gateway_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            authority_url: "ws://127.0.0.1:5004/sessions".into(),
            gateway_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for received files.
    pub received_files: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            received_files: PathBuf::from("received_files"),
        }
    }
}

/// Settings for the embedded authority (`--role authority|all`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthoritySection {
    pub bind_addr: String,
    pub session_max_age_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for AuthoritySection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5004".into(),
            session_max_age_secs: 600,
            cleanup_interval_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and derived configs
// ---------------------------------------------------------------------------

impl MoonshardConfig {
    /// Reads `path`, or returns the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default().validated());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        Ok(config.validated())
    }

    /// Clamps values that would make the server unusable.
    pub fn validated(mut self) -> Self {
        self.cluster.shard_count = self.cluster.shard_count.max(1);
        self.limits.max_connections = self.limits.max_connections.max(1);
        self.limits.max_sessions = self.limits.max_sessions.max(1);
        self.timing.cleanup_interval_secs = self.timing.cleanup_interval_secs.max(1);
        self.timing.status_interval_secs = self.timing.status_interval_secs.max(1);
        self.timing.sync_interval_secs = self.timing.sync_interval_secs.max(1);
        self.timing.reconnect_delay_secs = self.timing.reconnect_delay_secs.max(1);
        self.authority.cleanup_interval_secs = self.authority.cleanup_interval_secs.max(1);
        self
    }

    /// Display name of shard `index`.
    pub fn shard_name(&self, index: usize) -> String {
        if let Some(name) = self.cluster.shard_names.get(index) {
            return name.clone();
        }
        match SHARD_NAMES.get(index) {
            Some(name) => (*name).to_owned(),
            None => format!("Instance{index}"),
        }
    }

    /// Listen address of shard `index`. A `base_port` of 0 gives every
    /// shard an ephemeral port.
    pub fn shard_bind_addr(&self, index: usize) -> String {
        let port = match self.cluster.base_port {
            0 => 0,
            base => u32::from(base) + index as u32,
        };
        format!("{}:{port}", self.cluster.host)
    }

    pub fn connection_store(&self) -> StoreConfig {
        StoreConfig {
            max_active: self.limits.max_connections,
            max_queued: self.limits.max_queued_connections,
            grace_period: Duration::from_secs(self.timing.connection_grace_secs),
        }
    }

    pub fn session_store(&self) -> StoreConfig {
        StoreConfig {
            max_active: self.limits.max_sessions,
            max_queued: self.limits.max_queued_sessions,
            grace_period: Duration::from_secs(self.timing.session_grace_secs),
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            interval: self.timing.sync_interval(),
            reconnect_delay: self.timing.reconnect_delay(),
            report_active: true,
        }
    }

    pub fn authority_server(&self) -> AuthorityConfig {
        AuthorityConfig {
            bind_addr: self.authority.bind_addr.clone(),
            directory: DirectoryConfig {
                max_age: Duration::from_secs(self.authority.session_max_age_secs),
            },
            cleanup_interval: Duration::from_secs(self.authority.cleanup_interval_secs),
        }
    }
}
