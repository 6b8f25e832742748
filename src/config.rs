//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::CacheSizing;
use crate::store::{DefragPolicy, LogAccess, StoreConfig, SyncMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub caches: CachesSection,

    #[serde(default)]
    pub defrag: DefragPolicy,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub log_access: LogAccess,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default = "default_sync_threshold")]
    pub sync_threshold: usize,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("gidstore").to_string_lossy().to_string())
        .unwrap_or_else(|| "./gidstore_data".to_string())
}

fn default_sync_threshold() -> usize {
    64 * 1024 // 64 KB
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_access: LogAccess::default(),
            sync_mode: SyncMode::default(),
            sync_threshold: default_sync_threshold(),
        }
    }
}

/// Sizing of one index cache
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    #[serde(default = "default_load_factor")]
    pub load_factor: f64,
}

fn default_initial_capacity() -> usize {
    1024
}

fn default_load_factor() -> f64 {
    0.5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            load_factor: default_load_factor(),
        }
    }
}

impl From<CacheConfig> for CacheSizing {
    fn from(config: CacheConfig) -> Self {
        CacheSizing {
            initial_capacity: config.initial_capacity,
            load_factor: config.load_factor,
        }
    }
}

/// Index cache sizing
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CachesSection {
    #[serde(default)]
    pub name: CacheConfig,

    #[serde(default)]
    pub opaque: CacheConfig,

    #[serde(default)]
    pub location: CacheConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("gidstore").join("config.toml")),
            Some(PathBuf::from("/etc/gidstore/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Store overrides
        if let Ok(data_dir) = std::env::var("GIDSTORE_DATA_DIR") {
            self.store.data_dir = data_dir;
        }
        if let Ok(access) = std::env::var("GIDSTORE_LOG_ACCESS") {
            match access.parse() {
                Ok(access) => self.store.log_access = access,
                Err(e) => tracing::warn!("Ignoring GIDSTORE_LOG_ACCESS: {}", e),
            }
        }

        // API overrides
        if let Ok(host) = std::env::var("GIDSTORE_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("GIDSTORE_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("GIDSTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("GIDSTORE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Library-side store configuration
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: expand_home(&self.store.data_dir),
            log_access: self.store.log_access,
            sync_mode: self.store.sync_mode,
            sync_threshold: self.store.sync_threshold,
            name_cache: self.caches.name.into(),
            opaque_cache: self.caches.opaque.into(),
            location_cache: self.caches.location.into(),
            defrag: self.defrag,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# gidstore Configuration
#
# Environment variables override these settings:
# - GIDSTORE_DATA_DIR
# - GIDSTORE_LOG_ACCESS
# - GIDSTORE_API_HOST
# - GIDSTORE_API_PORT
# - GIDSTORE_LOG_LEVEL
# - GIDSTORE_LOG_FORMAT

[store]
# Directory holding the identity log
data_dir = "~/.local/share/gidstore"

# Log access: mapped (memory-mapped files) or file (positioned I/O)
log_access = "mapped"

# Sync mode: every_write, batched or none
sync_mode = "batched"

# Pending bytes before a batched sync
sync_threshold = 65536

[caches.name]
# Entries before the first growth
initial_capacity = 1024

# Fraction of slots that may be occupied (0, 1)
load_factor = 0.5

[caches.opaque]
initial_capacity = 1024
load_factor = 0.5

[caches.location]
initial_capacity = 1024
load_factor = 0.5

[defrag]
# Defragment once this fraction of log records are tombstones...
tombstone_ratio = 0.3

# ...and at least this many tombstones exist
min_tombstones = 1000

# How often the server checks (seconds, 0 disables)
interval_secs = 300

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8090

# Allowed CORS origins (empty allows any)
cors_origins = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
