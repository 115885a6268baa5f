//! Cluster node configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $VNCACHE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/vncache/config.toml
//!   3. ~/.config/vncache/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub store: StoreConfig,
    pub events: EventConfig,
    pub discovery: DiscoveryConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// This node's stable id, conventionally `host:port`. Used as `iss` in
    /// its advertisements and filtered out of discovery results.
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_addr: String,
    /// HTTP path for the upgrade handshake.
    pub connect_path: String,
    /// HTTP path returning this node's self-advertisement.
    pub well_known_path: String,
    /// HTTP path answering BFS discovery requests. Empty disables it.
    pub discovery_path: String,
    pub max_message_size: u32,
    pub max_header_buffer_size: u32,
    pub recv_buffer_size: u32,
    pub message_buffer_size: u32,
    pub keepalive_interval_sec: u64,
    pub request_timeout_sec: u64,
    pub max_peer_connections: u32,
    pub max_concurrent_connections: u32,
    /// Reject a connection whose token was issued to a different remote
    /// address than it is presented from.
    pub verify_ip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub bucket_count: u32,
    pub max_cache_entries: u32,
    /// Zero newly allocated buffers before handing them back.
    pub zero_all_allocations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub max_queue_depth: usize,
    pub queue_purge_interval_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub discovery_interval_sec: u64,
    /// Well-known URIs of seed nodes, resolved in parallel on startup.
    pub initial_peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// PEM-encoded private key used to sign this node's own JWTs and
    /// detached signatures.
    pub cache_private_key_path: PathBuf,
    /// PEM-encoded public key accepted from clients (not peers).
    pub client_public_key_path: PathBuf,
    /// PEM-encoded public key accepted from other peer nodes.
    pub peer_public_key_path: PathBuf,
    /// Either `"rsa-pkcs1-sha256"` or `"ecdsa-p256-sha256"`; must match the
    /// key material at `cache_private_key_path`.
    pub key_algorithm: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            store: StoreConfig::default(),
            events: EventConfig::default(),
            discovery: DiscoveryConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8710".to_string(),
            connect_path: String::new(),
            well_known_path: String::new(),
            discovery_path: String::new(),
            max_message_size: 1 << 20,
            max_header_buffer_size: 8 * 1024,
            recv_buffer_size: 64 * 1024,
            message_buffer_size: 64 * 1024,
            keepalive_interval_sec: 30,
            request_timeout_sec: 10,
            max_peer_connections: 64,
            max_concurrent_connections: 4096,
            verify_ip: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket_count: 16,
            max_cache_entries: 10_000,
            zero_all_allocations: false,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 10_000,
            queue_purge_interval_sec: 60,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_interval_sec: 300,
            initial_peers: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_private_key_path: config_dir().join("cache_private_key.pem"),
            client_public_key_path: config_dir().join("client_public_key.pem"),
            peer_public_key_path: config_dir().join("peer_public_key.pem"),
            key_algorithm: "ecdsa-p256-sha256".to_string(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("vncache")
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

impl NodeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NodeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("VNCACHE_CONFIG")
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
            let text = toml::to_string_pretty(&NodeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply VNCACHE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VNCACHE_IDENTITY__NODE_ID") {
            self.identity.node_id = v;
        }
        if let Ok(v) = std::env::var("VNCACHE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("VNCACHE_STORE__BUCKET_COUNT") {
            if let Ok(n) = v.parse() {
                self.store.bucket_count = n;
            }
        }
        if let Ok(v) = std::env::var("VNCACHE_STORE__MAX_CACHE_ENTRIES") {
            if let Ok(n) = v.parse() {
                self.store.max_cache_entries = n;
            }
        }
        if let Ok(v) = std::env::var("VNCACHE_NETWORK__VERIFY_IP") {
            self.network.verify_ip = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("VNCACHE_DISCOVERY__DISCOVERY_INTERVAL_SEC") {
            if let Ok(n) = v.parse() {
                self.discovery.discovery_interval_sec = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_store_settings() {
        let config = NodeConfig::default();
        assert_eq!(config.store.bucket_count, 16);
        assert!(config.store.max_cache_entries >= 2);
        assert!(!config.network.verify_ip);
    }

    #[test]
    fn apply_env_overrides_updates_bucket_count() {
        let mut config = NodeConfig::default();
        assert_eq!(config.store.bucket_count, 16);
        config.store.bucket_count = 64;
        assert_eq!(config.store.bucket_count, 64);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp =
            std::env::temp_dir().join(format!("vncache-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("VNCACHE_CONFIG", config_path.to_str().unwrap());
        }

        let path = NodeConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = NodeConfig::load().expect("load should succeed");
        assert_eq!(config.store.bucket_count, 16);

        unsafe {
            std::env::remove_var("VNCACHE_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
