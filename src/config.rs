//! Process configuration.
//!
//! YAML file + environment-variable overrides, following the load/from_env
//! shape of `PerfConfig` in the teacher (performance/config.rs) but against
//! a YAML document instead of TOML, and covering the sections spec.md 6
//! enumerates.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub brokers: BrokersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_app_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_app_name() -> String {
    "marketdata-service".to_string()
}
fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_env() -> String {
    "development".to_string()
}
fn default_app_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            env: default_env(),
            debug: false,
            timeout_secs: default_app_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub sqlite: SqliteConfig,
    /// Retained for compatibility with deployments that configure a
    /// separate time-series backend; this implementation backs both
    /// stores with the embedded engine (see DESIGN.md), but the fields
    /// are still parsed and validated rather than silently dropped.
    #[serde(default)]
    pub questdb: QuestDbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "default_metadata_path")]
    pub path: String,
    #[serde(default = "default_timeseries_path")]
    pub timeseries_path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    #[serde(default = "default_true")]
    pub wal: bool,
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}
fn default_timeseries_path() -> String {
    "./data/timeseries.db".to_string()
}
fn default_max_pool_size() -> u32 {
    8
}
fn default_min_pool_size() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
            timeseries_path: default_timeseries_path(),
            max_pool_size: default_max_pool_size(),
            min_pool_size: default_min_pool_size(),
            wal: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuestDbConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_read_timeout_ms() -> u64 {
    10_000
}
fn default_write_timeout_ms() -> u64 {
    10_000
}
fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_cors_headers() -> Vec<String> {
    vec!["content-type".to_string(), "authorization".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_cors_origins(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
        }
    }
}

/// Per-client token-bucket configuration at the HTTP edge (spec.md 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

fn default_rate_limit() -> u32 {
    100
}
fn default_rate_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_rate_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub output: LogOutput,
    #[serde(default)]
    pub rotation: LogRotationConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            rotation: LogRotationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRotationConfig {
    #[serde(default = "default_log_dir")]
    pub directory: String,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default)]
    pub compress: bool,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_log_file_prefix() -> String {
    "marketdata-service".to_string()
}
fn default_max_size_mb() -> u64 {
    100
}
fn default_max_age_days() -> u32 {
    14
}
fn default_max_backups() -> u32 {
    10
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file_prefix: default_log_file_prefix(),
            max_size_mb: default_max_size_mb(),
            max_age_days: default_max_age_days(),
            max_backups: default_max_backups(),
            compress: false,
        }
    }
}

/// Storage/pipeline tuning knobs (C5/C6/C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_retention_period_hours")]
    pub retention_period_hours: u64,
    #[serde(default = "default_vacuum_interval_hours")]
    pub vacuum_interval_hours: u64,
    #[serde(default = "default_vacuum_chunk_rows")]
    pub vacuum_chunk_rows: u64,
    #[serde(default = "default_max_storage_size_bytes")]
    pub max_storage_size_bytes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_max_batch_retries")]
    pub max_batch_retries: u32,
    #[serde(default = "default_clock_skew_tolerance_secs")]
    pub clock_skew_tolerance_secs: i64,
    #[serde(default = "default_dead_letter_path")]
    pub dead_letter_path: String,
}

fn default_retention_period_hours() -> u64 {
    30 * 24
}
fn default_vacuum_interval_hours() -> u64 {
    24
}
fn default_vacuum_chunk_rows() -> u64 {
    100_000
}
fn default_max_storage_size_bytes() -> u64 {
    50 * 1024 * 1024 * 1024
}
fn default_batch_size() -> usize {
    1000
}
fn default_flush_interval_secs() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_submit_timeout_ms() -> u64 {
    100
}
fn default_max_batch_retries() -> u32 {
    5
}
fn default_clock_skew_tolerance_secs() -> i64 {
    5
}
fn default_dead_letter_path() -> String {
    "./data/dead_letter.log".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_period_hours: default_retention_period_hours(),
            vacuum_interval_hours: default_vacuum_interval_hours(),
            vacuum_chunk_rows: default_vacuum_chunk_rows(),
            max_storage_size_bytes: default_max_storage_size_bytes(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            queue_capacity: default_queue_capacity(),
            submit_timeout_ms: default_submit_timeout_ms(),
            max_batch_retries: default_max_batch_retries(),
            clock_skew_tolerance_secs: default_clock_skew_tolerance_secs(),
            dead_letter_path: default_dead_letter_path(),
        }
    }
}

impl StorageConfig {
    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_hours * 3600)
    }
    pub fn vacuum_interval(&self) -> Duration {
        Duration::from_secs(self.vacuum_interval_hours * 3600)
    }
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
    pub fn clock_skew_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_tolerance_secs)
    }
}

/// Broker-session tuning knobs (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokersConfig {
    #[serde(default = "default_broker_config_path")]
    pub config_path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    #[serde(default = "default_backoff_cap_attempts")]
    pub backoff_cap_attempts: u32,
}

fn default_broker_config_path() -> String {
    "./config/brokers.yaml".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_max_reconnects() -> u32 {
    20
}
fn default_health_check_interval_secs() -> u64 {
    15
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_pong_timeout_ms() -> u64 {
    10_000
}
fn default_backoff_cap_attempts() -> u32 {
    6
}

impl Default for BrokersConfig {
    fn default() -> Self {
        Self {
            config_path: default_broker_config_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnects: default_max_reconnects(),
            health_check_interval_secs: default_health_check_interval_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            backoff_cap_attempts: default_backoff_cap_attempts(),
        }
    }
}

impl BrokersConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl SystemConfig {
    /// Load from a YAML file, falling back to defaults if absent.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_yaml::from_str::<Self>(&contents)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `CONFIG_PATH` env var (default `./config/config.yaml`), then
    /// apply environment-variable overrides on top.
    pub fn from_env() -> anyhow::Result<Self> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "./config/config.yaml".to_string());
        Self::load(path)
    }

    /// Apply the subset of settings that commonly need per-deployment
    /// overrides without editing the checked-in YAML.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("APP_ENV") {
            self.app.env = v;
        }
        if let Ok(v) = std::env::var("API_PORT") {
            if let Ok(port) = v.parse() {
                self.api.port = port;
            }
        }
        if let Ok(v) = std::env::var("API_HOST") {
            self.api.host = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("SQLITE_METADATA_PATH") {
            self.database.sqlite.path = v;
        }
        if let Ok(v) = std::env::var("SQLITE_TIMESERIES_PATH") {
            self.database.sqlite.timeseries_path = v;
        }
        if let Ok(v) = std::env::var("RETENTION_PERIOD_HOURS") {
            if let Ok(h) = v.parse() {
                self.storage.retention_period_hours = h;
            }
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            brokers: BrokersConfig::default(),
        }
    }
}
