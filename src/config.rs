use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::Level;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_app_config")]
    pub app: AppConfig,
    pub telegram: TelegramConfig,
    pub kafka: KafkaConfig,
    #[serde(default = "default_registry_config")]
    pub registry: RegistryConfig,
    #[serde(default = "default_log_config")]
    pub log: LogConfig,
    #[serde(default = "default_heartbeat_config")]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers, e.g. "localhost:9092"
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Capacity of the bounded channels feeding the relay loop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error; RUST_LOG takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_cron")]
    pub cron: String,
}

fn default_app_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_channel_capacity() -> usize {
    100
}

fn default_db_path() -> PathBuf {
    PathBuf::from("subscribers.db")
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_app_config() -> AppConfig {
    AppConfig {
        name: default_app_name(),
        version: default_app_version(),
    }
}

fn default_registry_config() -> RegistryConfig {
    RegistryConfig {
        database_path: default_db_path(),
        connect_attempts: default_connect_attempts(),
        retry_delay_secs: default_retry_delay_secs(),
    }
}

fn default_log_config() -> LogConfig {
    LogConfig {
        level: default_log_level(),
        format: LogFormat::default(),
    }
}

fn default_heartbeat_config() -> HeartbeatConfig {
    HeartbeatConfig {
        enabled: default_heartbeat_enabled(),
        cron: default_heartbeat_cron(),
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level
            .trim()
            .parse::<Level>()
            .map(LevelFilter::from_level)
            .map_err(|_| {
                anyhow!(
                    "log.level must be one of trace, debug, info, warn, error (got {:?})",
                    self.level
                )
            })
    }

    /// Debug or more verbose
    pub fn is_debug(&self) -> bool {
        self.level_filter()
            .map(|level| level >= LevelFilter::DEBUG)
            .unwrap_or(false)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token must not be empty");
        }
        for (field, value) in [
            ("kafka.brokers", &self.kafka.brokers),
            ("kafka.topic", &self.kafka.topic),
            ("kafka.group_id", &self.kafka.group_id),
        ] {
            if value.trim().is_empty() {
                bail!("{} must not be empty", field);
            }
        }
        if self.kafka.channel_capacity == 0 {
            bail!("kafka.channel_capacity must be at least 1");
        }
        if self.registry.connect_attempts == 0 {
            bail!("registry.connect_attempts must be at least 1");
        }
        self.log.level_filter()?;
        Ok(())
    }
}
