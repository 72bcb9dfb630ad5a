//! # configs
//!
//! Layered runtime settings: built-in defaults, then an optional TOML file
//! (`config/insight.toml`, or the path in `INSIGHT_CONFIG`), then
//! `INSIGHT__SECTION__KEY` environment variables.

use std::time::Duration;

use chrono::{FixedOffset, NaiveTime};
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "config/insight.toml";

/// Largest real-world UTC offset, in minutes.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub schedule: ScheduleSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Offset of the posting-day boundary from UTC
    pub utc_offset_minutes: i32,
    pub rank_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { utc_offset_minutes: 0, rank_timeout_ms: 10_000 }
    }
}

impl EngineSettings {
    pub fn day_offset(&self) -> Result<FixedOffset, ConfigError> {
        if self.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "engine.utc_offset_minutes must be within ±{MAX_OFFSET_MINUTES}, got {}",
                self.utc_offset_minutes
            )));
        }
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| ConfigError::Invalid("engine.utc_offset_minutes is out of range".into()))
    }

    pub fn rank_timeout(&self) -> Duration {
        Duration::from_millis(self.rank_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    /// Local wall-clock time of the daily reset, `HH:MM`
    pub reset_at: String,
    pub run_on_start: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self { enabled: true, reset_at: "00:00".into(), run_on_start: false }
    }
}

impl ScheduleSettings {
    pub fn reset_at(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.reset_at.trim(), "%H:%M").map_err(|e| {
            ConfigError::Invalid(format!("schedule.reset_at {:?} is not HH:MM: {e}", self.reset_at))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// PostgreSQL URL; the in-memory store is used when absent
    pub url: Option<SecretString>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: None, max_connections: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 signing secret; in-process session tokens are used when absent
    pub jwt_secret: Option<SecretString>,
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { jwt_secret: None, token_ttl_secs: 86_400 }
    }
}

impl AuthSettings {
    pub fn token_ttl(&self) -> chrono::Duration {
        i64::try_from(self.token_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".into(), format: LogFormat::Pretty }
    }
}

impl Settings {
    /// Loads `.env`, the config file and the environment, then validates.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var("INSIGHT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        debug!(path = %path, "loading configuration");

        let builder = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("INSIGHT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.day_offset()?;
        self.schedule.reset_at()?;
        if self.engine.rank_timeout_ms == 0 {
            return Err(ConfigError::Invalid("engine.rank_timeout_ms must be greater than zero".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be greater than zero".into()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("auth.token_ttl_secs must be greater than zero".into()));
        }
        Ok(())
    }
}
