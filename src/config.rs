//! Configuration loading and types for Filestore.
//!
//! Two layers:
//!
//! 1. A YAML file deserialized into [`Config`], governing the process:
//!    networking, logging, metadata persistence, which store kind to use,
//!    and the event listener. Assembled once at startup and passed by value
//!    to every component that needs it — there is no global setup state.
//! 2. Backend credentials and endpoints, resolved from
//!    `{KIND}_`-prefixed environment variables at backend construction
//!    time (`MINIOLOCAL_HOST`, `AWSS3_BUCKET_NAME`, ...). The prefix is
//!    the configured store kind uppercased, so several backend profiles
//!    can coexist in one environment.

use serde::Deserialize;
use std::path::Path;

use crate::errors::StoreError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object store selection and namespace settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Event listener settings.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            metadata: MetadataConfig::default(),
            store: StoreConfig::default(),
            listener: ListenerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
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

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
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

/// Object store selection and namespace settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store kind label. `awss3` selects the AWS default-credential
    /// backend; any other `awss3*` label a generic S3-compatible endpoint;
    /// `minio*` the notification-capable MinIO backend. The label doubles
    /// as the environment-variable prefix and the `location` value
    /// persisted on every record.
    #[serde(default = "default_store_kind")]
    pub kind: String,

    /// Namespace-sharding modulus: object keys are prefixed with
    /// `id mod modulus` to spread them over the bucket key space.
    #[serde(default = "default_namespace_modulus")]
    pub namespace_modulus: u64,

    /// Checksum algorithm recorded alongside client-supplied checksums.
    #[serde(default = "default_checksum_type")]
    pub checksum_type: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            namespace_modulus: default_namespace_modulus(),
            checksum_type: default_checksum_type(),
        }
    }
}

/// Event listener configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListenerConfig {
    /// Whether to run the reconciliation pipeline.
    #[serde(default)]
    pub enabled: bool,

    /// Run only the listener, without the HTTP API. Useful for deploying
    /// reconciliation as its own process.
    #[serde(default)]
    pub only_mode: bool,

    /// Capacity of the notification-batch channel between the listener and
    /// the reconciliation worker. A full channel blocks the listener
    /// (backpressure) rather than dropping batches.
    #[serde(default = "default_listener_queue")]
    pub queue_depth: usize,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/healthz` probe.
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

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4321
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_store_kind() -> String {
    "minio".to_string()
}

fn default_namespace_modulus() -> u64 {
    10
}

fn default_checksum_type() -> String {
    "SHA256".to_string()
}

fn default_listener_queue() -> usize {
    16
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

// -- Backend environment resolution ------------------------------------------

/// Compose the environment variable name for a kind-prefixed setting.
fn env_key(kind: &str, suffix: &str) -> String {
    format!("{}_{}", kind.to_uppercase(), suffix)
}

/// Read a mandatory kind-prefixed environment value. The error names the
/// exact variable so the operator knows what to fix.
fn required_env(kind: &str, suffix: &str) -> Result<String, StoreError> {
    let key = env_key(kind, suffix);
    match std::env::var(&key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(StoreError::ConfigurationIncomplete { key }),
    }
}

/// Read an optional kind-prefixed environment value.
fn optional_env(kind: &str, suffix: &str) -> Option<String> {
    std::env::var(env_key(kind, suffix))
        .ok()
        .filter(|value| !value.is_empty())
}

/// Parse a mandatory boolean setting.
fn required_bool(kind: &str, suffix: &str) -> Result<bool, StoreError> {
    let raw = required_env(kind, suffix)?;
    match raw.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(StoreError::ConfigurationIncomplete {
            key: env_key(kind, suffix),
        }),
    }
}

/// Parse a mandatory integer setting.
fn required_u64(kind: &str, suffix: &str) -> Result<u64, StoreError> {
    let raw = required_env(kind, suffix)?;
    raw.parse::<u64>()
        .map_err(|_| StoreError::ConfigurationIncomplete {
            key: env_key(kind, suffix),
        })
}

/// Replace a secret with a placeholder for logging.
fn masked(_secret: &str) -> &'static str {
    "[...]"
}

/// Settings for a generic S3-compatible backend, resolved from
/// `{KIND}_HOST`, `{KIND}_PORT`, `{KIND}_BUCKET_NAME`,
/// `{KIND}_ACCESS_KEY_ID`, `{KIND}_SECRET_ACCESS_KEY`, `{KIND}_REGION`,
/// `{KIND}_SECURE`, `{KIND}_PRESIGN_DURATION_MIN`. Only `PORT` is optional.
#[derive(Debug, Clone)]
pub struct GenericBackendSettings {
    pub host: String,
    pub port: Option<String>,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub secure: bool,
    /// Presign URL validity in minutes.
    pub presign_minutes: u64,
}

impl GenericBackendSettings {
    /// Resolve the settings; the first missing required value fails with
    /// [`StoreError::ConfigurationIncomplete`] naming it.
    pub fn from_env(kind: &str) -> Result<Self, StoreError> {
        let host = required_env(kind, "HOST")?;
        let port = optional_env(kind, "PORT");
        let bucket = required_env(kind, "BUCKET_NAME")?;
        let access_key_id = required_env(kind, "ACCESS_KEY_ID")?;
        let secret_access_key = required_env(kind, "SECRET_ACCESS_KEY")?;
        let region = required_env(kind, "REGION")?;
        let secure = required_bool(kind, "SECURE")?;
        let presign_minutes = required_u64(kind, "PRESIGN_DURATION_MIN")?;

        Ok(Self {
            host,
            port,
            bucket,
            access_key_id,
            secret_access_key,
            region,
            secure,
            presign_minutes,
        })
    }

    /// The endpoint URL composed from host, port, and the secure flag.
    /// Local stores listen on nonstandard ports, so a configured port is
    /// appended to the address.
    pub fn endpoint_url(&self) -> String {
        let protocol = if self.secure { "https" } else { "http" };
        match &self.port {
            Some(port) => format!("{protocol}://{}:{port}", self.host),
            None => format!("{protocol}://{}", self.host),
        }
    }

    /// Log the resolved values, secrets masked.
    pub fn log(&self) {
        tracing::debug!(
            host = %self.host,
            port = %self.port.as_deref().unwrap_or(""),
            bucket = %self.bucket,
            access_key_id = masked(&self.access_key_id),
            secret_access_key = masked(&self.secret_access_key),
            region = %self.region,
            secure = self.secure,
            presign_minutes = self.presign_minutes,
            "resolved generic backend settings"
        );
    }
}

/// Settings for the AWS default-credential backend. Credentials, region,
/// and endpoint come from the standard AWS credential chain; only
/// `{KIND}_BUCKET_NAME` and `{KIND}_PRESIGN_DURATION_MIN` are read here.
#[derive(Debug, Clone)]
pub struct DefaultBackendSettings {
    pub bucket: String,
    /// Presign URL validity in minutes.
    pub presign_minutes: u64,
}

impl DefaultBackendSettings {
    pub fn from_env(kind: &str) -> Result<Self, StoreError> {
        let bucket = required_env(kind, "BUCKET_NAME")?;
        let presign_minutes = required_u64(kind, "PRESIGN_DURATION_MIN")?;
        Ok(Self {
            bucket,
            presign_minutes,
        })
    }

    pub fn log(&self) {
        tracing::debug!(
            bucket = %self.bucket,
            presign_minutes = self.presign_minutes,
            "resolved default backend settings"
        );
    }
}

/// Settings for the notification-capable MinIO backend. Same variables as
/// the generic backend except the presign validity is denominated in days
/// (`{KIND}_PRESIGN_DURATION_DAYS`) — capability URLs handed to devices
/// stay valid across long offline windows. The asymmetry with the
/// minute-denominated backends is deliberate and must not be unified.
#[derive(Debug, Clone)]
pub struct MinioBackendSettings {
    pub host: String,
    pub port: Option<String>,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub secure: bool,
    /// Presign URL validity in days.
    pub presign_days: u64,
}

impl MinioBackendSettings {
    pub fn from_env(kind: &str) -> Result<Self, StoreError> {
        let host = required_env(kind, "HOST")?;
        let port = optional_env(kind, "PORT");
        let bucket = required_env(kind, "BUCKET_NAME")?;
        let access_key_id = required_env(kind, "ACCESS_KEY_ID")?;
        let secret_access_key = required_env(kind, "SECRET_ACCESS_KEY")?;
        let region = required_env(kind, "REGION")?;
        let secure = required_bool(kind, "SECURE")?;
        let presign_days = required_u64(kind, "PRESIGN_DURATION_DAYS")?;

        Ok(Self {
            host,
            port,
            bucket,
            access_key_id,
            secret_access_key,
            region,
            secure,
            presign_days,
        })
    }

    /// The endpoint URL composed from host, port, and the secure flag.
    pub fn endpoint_url(&self) -> String {
        let protocol = if self.secure { "https" } else { "http" };
        match &self.port {
            Some(port) => format!("{protocol}://{}:{port}", self.host),
            None => format!("{protocol}://{}", self.host),
        }
    }

    pub fn log(&self) {
        tracing::debug!(
            host = %self.host,
            port = %self.port.as_deref().unwrap_or(""),
            bucket = %self.bucket,
            access_key_id = masked(&self.access_key_id),
            secret_access_key = masked(&self.secret_access_key),
            region = %self.region,
            secure = self.secure,
            presign_days = self.presign_days,
            "resolved minio backend settings"
        );
    }
}

/// Settings for the event listener, resolved from the same prefix plus the
/// listener-only `{KIND}_ACCOUNT_ID` and `{KIND}_NOTIFICATION_NAME`.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub host: String,
    pub port: Option<String>,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub account_id: String,
    pub region: String,
    pub notification_name: String,
    pub secure: bool,
}

impl ListenerSettings {
    pub fn from_env(kind: &str) -> Result<Self, StoreError> {
        let host = required_env(kind, "HOST")?;
        let port = optional_env(kind, "PORT");
        let bucket = required_env(kind, "BUCKET_NAME")?;
        let access_key_id = required_env(kind, "ACCESS_KEY_ID")?;
        let secret_access_key = required_env(kind, "SECRET_ACCESS_KEY")?;
        let account_id = required_env(kind, "ACCOUNT_ID")?;
        let region = required_env(kind, "REGION")?;
        let notification_name = required_env(kind, "NOTIFICATION_NAME")?;
        let secure = required_bool(kind, "SECURE")?;

        Ok(Self {
            host,
            port,
            bucket,
            access_key_id,
            secret_access_key,
            account_id,
            region,
            notification_name,
            secure,
        })
    }

    /// The endpoint URL composed from host, port, and the secure flag.
    pub fn endpoint_url(&self) -> String {
        let protocol = if self.secure { "https" } else { "http" };
        match &self.port {
            Some(port) => format!("{protocol}://{}:{port}", self.host),
            None => format!("{protocol}://{}", self.host),
        }
    }

    /// Bare authority (host or host:port) used as the SigV4 Host header.
    pub fn authority(&self) -> String {
        match &self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    pub fn log(&self) {
        tracing::debug!(
            host = %self.host,
            port = %self.port.as_deref().unwrap_or(""),
            bucket = %self.bucket,
            access_key_id = masked(&self.access_key_id),
            secret_access_key = masked(&self.secret_access_key),
            account_id = %self.account_id,
            region = %self.region,
            notification = %self.notification_name,
            secure = self.secure,
            "resolved event listener settings"
        );
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Env-dependent tests use a unique kind prefix each so they do not
    // interfere when the test harness runs them in parallel.

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4321);
        assert_eq!(config.store.kind, "minio");
        assert_eq!(config.store.namespace_modulus, 10);
        assert_eq!(config.store.checksum_type, "SHA256");
        assert!(!config.listener.enabled);
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
server:
  port: 8080
store:
  kind: awss3local
  namespace_modulus: 100
listener:
  enabled: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.kind, "awss3local");
        assert_eq!(config.store.namespace_modulus, 100);
        assert!(config.listener.enabled);
        // Untouched sections keep their defaults.
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_generic_settings_first_missing_value_named() {
        let kind = "cfgtest1";
        std::env::set_var("CFGTEST1_HOST", "s3.local");
        // BUCKET_NAME intentionally absent.
        std::env::remove_var("CFGTEST1_BUCKET_NAME");
        let err = GenericBackendSettings::from_env(kind).unwrap_err();
        match err {
            StoreError::ConfigurationIncomplete { key } => {
                assert_eq!(key, "CFGTEST1_BUCKET_NAME");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        std::env::remove_var("CFGTEST1_HOST");
    }

    #[test]
    fn test_generic_settings_complete() {
        let vars = [
            ("CFGTEST2_HOST", "minio.local"),
            ("CFGTEST2_PORT", "9000"),
            ("CFGTEST2_BUCKET_NAME", "files"),
            ("CFGTEST2_ACCESS_KEY_ID", "ak"),
            ("CFGTEST2_SECRET_ACCESS_KEY", "sk"),
            ("CFGTEST2_REGION", "us-east-1"),
            ("CFGTEST2_SECURE", "false"),
            ("CFGTEST2_PRESIGN_DURATION_MIN", "60"),
        ];
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let settings = GenericBackendSettings::from_env("cfgtest2").unwrap();
        assert_eq!(settings.endpoint_url(), "http://minio.local:9000");
        assert_eq!(settings.presign_minutes, 60);
        assert!(!settings.secure);
        for (k, _) in vars {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_malformed_presign_is_configuration_error() {
        let vars = [
            ("CFGTEST3_HOST", "h"),
            ("CFGTEST3_BUCKET_NAME", "b"),
            ("CFGTEST3_ACCESS_KEY_ID", "a"),
            ("CFGTEST3_SECRET_ACCESS_KEY", "s"),
            ("CFGTEST3_REGION", "r"),
            ("CFGTEST3_SECURE", "true"),
            ("CFGTEST3_PRESIGN_DURATION_MIN", "sixty"),
        ];
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let err = GenericBackendSettings::from_env("cfgtest3").unwrap_err();
        match err {
            StoreError::ConfigurationIncomplete { key } => {
                assert_eq!(key, "CFGTEST3_PRESIGN_DURATION_MIN");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        for (k, _) in vars {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_secure_endpoint_without_port() {
        let vars = [
            ("CFGTEST4_HOST", "s3.amazonaws.com"),
            ("CFGTEST4_BUCKET_NAME", "b"),
            ("CFGTEST4_ACCESS_KEY_ID", "a"),
            ("CFGTEST4_SECRET_ACCESS_KEY", "s"),
            ("CFGTEST4_REGION", "eu-west-1"),
            ("CFGTEST4_SECURE", "true"),
            ("CFGTEST4_PRESIGN_DURATION_MIN", "15"),
        ];
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let settings = GenericBackendSettings::from_env("cfgtest4").unwrap();
        assert_eq!(settings.endpoint_url(), "https://s3.amazonaws.com");
        for (k, _) in vars {
            std::env::remove_var(k);
        }
    }
}
