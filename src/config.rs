//! Configuration loading and types for BleepStore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Every field has a default, so any subsection — or the
//! whole file — may be omitted.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// How long an incomplete multipart upload may sit before it is eligible
    /// for reaping at startup (§4.12).
    #[serde(default = "default_multipart_upload_ttl_days")]
    pub multipart_upload_ttl_days: u32,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Parsed for forward-compatibility; metrics and health endpoints are
    /// not part of this crate.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// AWS region to present (e.g. `us-east-1`).
    #[serde(default = "default_region")]
    pub region: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum object size in bytes (default 5 GiB).
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            shutdown_timeout: default_shutdown_timeout(),
            max_object_size: default_max_object_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings. Parsed so a config file written for a cluster
/// deployment still loads here; neither field changes this crate's behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub metrics: bool,

    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Authentication settings.
///
/// Field names match `bleepstore.example.yaml`: `auth.access_key` and
/// `auth.secret_key`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default = "default_access_key")]
    pub access_key: String,

    /// Secret access key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default = "default_secret_key")]
    pub secret_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_key: default_access_key(),
            secret_key: default_secret_key(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local filesystem storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_access_key() -> String {
    "bleepstore".to_string()
}

fn default_secret_key() -> String {
    "bleepstore-secret".to_string()
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_object_size() -> u64 {
    5_368_709_120 // 5 GiB
}

fn default_multipart_upload_ttl_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = Config {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            metadata: MetadataConfig::default(),
            storage: StorageConfig::default(),
            multipart_upload_ttl_days: default_multipart_upload_ttl_days(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
        };
        assert_eq!(config.server.port, 9012);
        assert_eq!(config.metadata.engine, "sqlite");
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.multipart_upload_ttl_days, 7);
    }

    #[test]
    fn empty_yaml_loads_all_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.access_key, "bleepstore");
    }

    #[test]
    fn partial_yaml_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.yaml");
        std::fs::write(
            &path,
            "server:\n  port: 9999\nstorage:\n  backend: memory\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, "memory");
    }

    #[test]
    fn auth_config_accepts_legacy_field_aliases() {
        let yaml = "auth:\n  access_key_id: AKIDTEST\n  secret_access_key: shh\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth.access_key, "AKIDTEST");
        assert_eq!(config.auth.secret_key, "shh");
    }
}
