//! Configuration loading and validation (C11).
//!
//! Follows the "configure then apply" contract of §4.11: a raw record is
//! parsed, then validated and normalized (derived fields filled in,
//! contradictory combinations rejected) before it is used to build or
//! reconfigure a live `Cache`. No partial field mutation — `Config` is
//! immutable once built; changes go through `Config::load`/`Config::build`
//! again.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::Serializer;

const DEFAULT_SHARD_COUNT: usize = 32;
const DEFAULT_MAX_BYTES: i64 = 1 << 30; // 1_073_741_824
const DEFAULT_EVICTION_THRESHOLD: f64 = 0.9;
const DEFAULT_PERSISTENCE_PATH: &str = "mudis_data";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_UNIX_SOCKET_PATH: &str = "/tmp/mudis.sock";
const DEFAULT_TCP_ADDR: &str = "127.0.0.1:9876";

const ENV_SHARD_COUNT: &str = "MUDIS_BUCKETS";
const ENV_FORCE_TCP: &str = "MUDIS_FORCE_TCP";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_bytes must be > 0")]
    MaxBytesNotPositive,
    #[error("max_value_bytes must be > 0 and <= max_bytes")]
    MaxValueBytesInvalid,
    #[error("eviction_threshold must satisfy 0 < x <= 1, got {0}")]
    EvictionThresholdOutOfRange(f64),
    #[error("shard_count must be > 0")]
    ShardCountNotPositive,
    #[error("max_ttl must be > 0 when set")]
    MaxTtlNotPositive,
    #[error("default_ttl must be > 0 when set")]
    DefaultTtlNotPositive,
    #[error("{ENV_SHARD_COUNT} must be a positive integer, got {0:?}")]
    InvalidShardCountEnv(String),
    #[error("persistence_path must not be empty when persistence is enabled")]
    EmptyPersistencePath,
}

/// Raw, directly-deserialized configuration record. Field names and
/// defaults follow the external configuration table exactly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RawConfig {
    pub env: String,
    pub log_level: Option<String>,
    pub serializer: Serializer,
    pub compress: bool,
    pub max_bytes: i64,
    pub max_value_bytes: Option<i64>,
    pub hard_memory_limit: bool,
    pub eviction_threshold: f64,
    pub shard_count: usize,
    #[serde(with = "humantime_serde")]
    pub max_ttl: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    pub persistence: Persistence,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Persistence {
    pub enabled: bool,
    pub path: String,
    pub format: PersistenceFormat,
    pub safe_write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceFormat {
    Json,
    Binary,
}

impl Default for PersistenceFormat {
    fn default() -> Self {
        PersistenceFormat::Json
    }
}

/// Optional IPC server settings (§6 wire protocol) — an external
/// collaborator surface, not part of the core cache engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub unix_path: String,
    pub tcp_addr: String,
    pub force_tcp: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            unix_path: DEFAULT_UNIX_SOCKET_PATH.to_string(),
            tcp_addr: DEFAULT_TCP_ADDR.to_string(),
            force_tcp: false,
        }
    }
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            enabled: false,
            path: DEFAULT_PERSISTENCE_PATH.to_string(),
            format: PersistenceFormat::Json,
            safe_write: true,
        }
    }
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            log_level: None,
            serializer: Serializer::Json,
            compress: false,
            max_bytes: DEFAULT_MAX_BYTES,
            max_value_bytes: None,
            hard_memory_limit: false,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            shard_count: DEFAULT_SHARD_COUNT,
            max_ttl: None,
            default_ttl: None,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            persistence: Persistence::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Validated, immutable configuration. Construct via `Config::build` (from
/// an in-memory `RawConfig`, e.g. in tests) or `Config::load` (from a YAML
/// file plus environment overrides).
#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub log_level: Option<String>,
    pub serializer: Serializer,
    pub compress: bool,
    pub max_bytes: i64,
    pub max_value_bytes: Option<i64>,
    pub hard_memory_limit: bool,
    pub eviction_threshold: f64,
    pub shard_count: usize,
    pub max_ttl: Option<Duration>,
    pub default_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    pub persistence: Arc<Persistence>,
    pub server: Arc<ServerConfig>,
}

impl Config {
    pub fn is_prod(&self) -> bool {
        self.env == "prod"
    }

    /// Validates a `RawConfig`, applying the environment override for
    /// `shard_count`, and produces an immutable `Config`. Rejects invalid
    /// combinations before any live state exists (§4.11).
    pub fn build(mut raw: RawConfig) -> Result<Config, ConfigError> {
        if let Ok(val) = std::env::var(ENV_SHARD_COUNT) {
            let parsed: usize = val
                .parse()
                .map_err(|_| ConfigError::InvalidShardCountEnv(val.clone()))?;
            if parsed == 0 {
                return Err(ConfigError::InvalidShardCountEnv(val));
            }
            raw.shard_count = parsed;
        }
        if std::env::var(ENV_FORCE_TCP).map(|v| v == "true").unwrap_or(false) {
            raw.server.force_tcp = true;
        }

        if raw.max_bytes <= 0 {
            return Err(ConfigError::MaxBytesNotPositive);
        }
        if let Some(mv) = raw.max_value_bytes {
            if mv <= 0 || mv > raw.max_bytes {
                return Err(ConfigError::MaxValueBytesInvalid);
            }
        }
        if !(raw.eviction_threshold > 0.0 && raw.eviction_threshold <= 1.0) {
            return Err(ConfigError::EvictionThresholdOutOfRange(raw.eviction_threshold));
        }
        if raw.shard_count == 0 {
            return Err(ConfigError::ShardCountNotPositive);
        }
        if matches!(raw.max_ttl, Some(d) if d.is_zero()) {
            return Err(ConfigError::MaxTtlNotPositive);
        }
        if matches!(raw.default_ttl, Some(d) if d.is_zero()) {
            return Err(ConfigError::DefaultTtlNotPositive);
        }
        if raw.persistence.enabled && raw.persistence.path.trim().is_empty() {
            return Err(ConfigError::EmptyPersistencePath);
        }

        Ok(Config {
            env: raw.env,
            log_level: raw.log_level,
            serializer: raw.serializer,
            compress: raw.compress,
            max_bytes: raw.max_bytes,
            max_value_bytes: raw.max_value_bytes,
            hard_memory_limit: raw.hard_memory_limit,
            eviction_threshold: raw.eviction_threshold,
            shard_count: raw.shard_count,
            max_ttl: raw.max_ttl,
            default_ttl: raw.default_ttl,
            sweep_interval: raw.sweep_interval,
            persistence: Arc::new(raw.persistence),
            server: Arc::new(raw.server),
        })
    }

    /// Loads configuration from a YAML file and validates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config yaml file {path:?}"))?;
        let raw: RawConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("parse yaml config {path:?}"))?;
        Config::build(raw).with_context(|| format!("validate config {path:?}"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::build(RawConfig::default()).expect("default config must be valid")
    }
}

#[cfg(test)]
pub mod test_config;
