//! Static configuration loaded once at startup
//!
//! One TOML file: a `[global]` block carrying process-wide identity and
//! per-exporter blocks with an `enabled` flag, connection parameters,
//! intervals, window sizes, batch caps, and receiver URLs. Every field has
//! a default mirroring the behavior with no config present; blocks left
//! out entirely stay disabled. Configuration is immutable for the life of
//! the process.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub redis: RedisConfig,
    pub mysql: MySqlConfig,
    pub mongodb: MongoConfig,
    pub slow_query: SlowQueryConfig,
    pub linux: LinuxConfig,
    pub api_log: ApiLogConfig,
    pub scheduler: SchedulerConfig,
}

/// Process-wide identity merged into every exporter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub app_name: String,
    pub purpose: String,
    /// Central server receiving the one-time liveness notification
    pub monitor_url: Option<String>,
    /// Static key included in the liveness notification
    pub monitor_key: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            app_name: "unknown_app".to_string(),
            purpose: String::new(),
            monitor_url: None,
            monitor_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    /// Metrics cycle interval in seconds
    pub interval: u64,
    pub receiver_url: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_log_file: PathBuf,
    pub receiver_url_logs: Option<String>,
    /// Log watcher cycle interval in seconds
    pub log_check_interval: u64,
    pub max_logs_per_batch: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 30,
            receiver_url: String::new(),
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_log_file: PathBuf::from("/var/log/redis/redis-server.log"),
            receiver_url_logs: None,
            log_check_interval: 300,
            max_logs_per_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    pub enabled: bool,
    pub interval: u64,
    pub receiver_url: String,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: String,
    /// Digest sampler cycle interval in seconds
    pub digest_interval: u64,
    /// Rolling window over digest samples, minutes
    pub digest_window_minutes: i64,
    pub mysql_log_file: PathBuf,
    pub receiver_url_logs: Option<String>,
    pub log_check_interval: u64,
    pub max_logs_per_batch: usize,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 30,
            receiver_url: String::new(),
            mysql_host: "127.0.0.1".to_string(),
            mysql_port: 3306,
            mysql_user: "root".to_string(),
            mysql_password: String::new(),
            digest_interval: 300,
            digest_window_minutes: 60,
            mysql_log_file: PathBuf::from("/var/log/mysql/error.log"),
            receiver_url_logs: None,
            log_check_interval: 300,
            max_logs_per_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub enabled: bool,
    pub interval: u64,
    pub receiver_url: String,
    pub mongo_uri: String,
    pub mongo_db: String,
    pub mongo_log_file: PathBuf,
    pub receiver_url_logs: Option<String>,
    pub log_check_interval: u64,
    pub max_logs_per_batch: usize,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 30,
            receiver_url: String::new(),
            mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
            mongo_db: "livolive".to_string(),
            mongo_log_file: PathBuf::from("/var/log/mongodb/mongod.log"),
            receiver_url_logs: None,
            log_check_interval: 300,
            max_logs_per_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlowQueryConfig {
    pub enabled: bool,
    pub export_interval: u64,
    pub receiver_url: String,
    pub mongo_uri: String,
    pub mongo_db: String,
    pub mongo_slow_threshold_ms: i64,
    pub max_queries: usize,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: String,
    /// First-cycle lookback window, minutes
    pub log_window_minutes: i64,
}

impl Default for SlowQueryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            export_interval: 1800,
            receiver_url: String::new(),
            mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
            mongo_db: "livolive".to_string(),
            mongo_slow_threshold_ms: 0,
            max_queries: 50,
            mysql_host: "127.0.0.1".to_string(),
            mysql_port: 3306,
            mysql_user: "root".to_string(),
            mysql_password: String::new(),
            log_window_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinuxConfig {
    pub enabled: bool,
    pub export_interval: u64,
    pub receiver_url: String,
}

impl Default for LinuxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            export_interval: 30,
            receiver_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiLogConfig {
    pub enabled: bool,
    pub export_interval: u64,
    pub receiver_url: String,
    pub log_window_minutes: i64,
    pub sources: Vec<ApiLogSource>,
}

impl Default for ApiLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            export_interval: 300,
            receiver_url: String::new(),
            log_window_minutes: 30,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiLogSource {
    #[serde(rename = "type")]
    pub kind: ApiLogSourceKind,
    pub enabled: bool,
    pub access_log_path: PathBuf,
    pub max_logs: usize,
    pub mongo_uri: Option<String>,
    pub collection: Option<String>,
}

impl Default for ApiLogSource {
    fn default() -> Self {
        Self {
            kind: ApiLogSourceKind::Nginx,
            enabled: true,
            access_log_path: PathBuf::from("/var/log/nginx/access.log"),
            max_logs: 1000,
            mongo_uri: None,
            collection: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiLogSourceKind {
    #[default]
    Nginx,
    Mongoose,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub export_interval: u64,
    pub receiver_url: String,
    pub max_logs: usize,
    pub log_window_minutes: i64,
    /// Base directory for local daily JSONL spool files
    pub spool_dir: PathBuf,
    pub sources: Vec<SchedulerSource>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            export_interval: 300,
            receiver_url: String::new(),
            max_logs: 100,
            log_window_minutes: 10,
            spool_dir: PathBuf::from("metrics_collector"),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSource {
    #[serde(rename = "type")]
    pub kind: SchedulerSourceKind,
    pub enabled: bool,
    /// Explicit syslog path; auto-detected when unset
    pub syslog_path: Option<PathBuf>,
}

impl Default for SchedulerSource {
    fn default() -> Self {
        Self {
            kind: SchedulerSourceKind::Cron,
            enabled: true,
            syslog_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerSourceKind {
    #[default]
    Cron,
    Systemd,
}

impl Config {
    /// Load and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly work
    ///
    /// Each enabled exporter needs somewhere to deliver; everything else
    /// degrades at runtime instead of failing here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoints = [
            ("redis", self.redis.enabled, &self.redis.receiver_url),
            ("mysql", self.mysql.enabled, &self.mysql.receiver_url),
            ("mongodb", self.mongodb.enabled, &self.mongodb.receiver_url),
            (
                "slow_query",
                self.slow_query.enabled,
                &self.slow_query.receiver_url,
            ),
            ("linux", self.linux.enabled, &self.linux.receiver_url),
            ("api_log", self.api_log.enabled, &self.api_log.receiver_url),
            (
                "scheduler",
                self.scheduler.enabled,
                &self.scheduler.receiver_url,
            ),
        ];

        for (name, enabled, url) in endpoints {
            if enabled && url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} exporter is enabled but has no receiver_url",
                    name
                )));
            }
        }

        Ok(())
    }
}
