use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::alerting::AnalyticsSettings;
use crate::notifications::models::ChannelConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// 64 hex characters (32 bytes).
    pub header_encryption_key: String,
    pub log_dir: String,

    pub probe_interval_secs: u64,
    pub max_concurrent_probes: Option<usize>,

    pub analytics_interval_secs: u64,
    pub check_window_secs: u64,
    pub baseline_window_secs: u64,
    pub reliability_threshold_percent: f64,
    pub min_samples: i64,
    pub degradation_factor: f64,

    pub retention_days: u32,
    pub prune_interval_secs: u64,

    /// Bounds each outbound notification request.
    pub notification_timeout_secs: u64,
    pub notification_channels: Vec<ChannelConfig>,
}

// Scalar fields, shared by the file and environment layers.
#[derive(Deserialize, Default, Debug)]
pub struct PartialEngineConfig {
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub header_encryption_key: Option<String>,
    pub log_dir: Option<String>,
    pub probe_interval_secs: Option<u64>,
    pub max_concurrent_probes: Option<usize>,
    pub analytics_interval_secs: Option<u64>,
    pub check_window_secs: Option<u64>,
    pub baseline_window_secs: Option<u64>,
    pub reliability_threshold_percent: Option<f64>,
    pub min_samples: Option<i64>,
    pub degradation_factor: Option<f64>,
    pub retention_days: Option<u32>,
    pub prune_interval_secs: Option<u64>,
    pub notification_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default, Debug)]
struct FileConfig {
    #[serde(flatten)]
    scalars: PartialEngineConfig,
    #[serde(default)]
    notification_channels: Vec<ChannelConfig>,
}

const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;
const DEFAULT_ANALYTICS_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 3600;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 10;

// Upper bounds keep window and cutoff arithmetic within chrono's range.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 3600;
const MAX_RETENTION_DAYS: u32 = 36_500;

fn default_log_dir() -> String {
    "logs".to_string()
}

impl EngineConfig {
    /// Layers, highest priority first: environment (after `.env`), the
    /// optional TOML file, defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let env_config = envy::from_env::<PartialEngineConfig>()?;
        Self::load_with_env(config_path, env_config)
    }

    pub fn load_with_env(
        config_path: Option<&str>,
        env_config: PartialEngineConfig,
    ) -> Result<Self, ConfigError> {
        let file_config = match config_path {
            Some(path_str) => read_file(Path::new(path_str))?,
            None => FileConfig::default(),
        };
        let file = file_config.scalars;
        let env = env_config;
        let analytics_defaults = AnalyticsSettings::default();

        let config = EngineConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env
                .database_max_connections
                .or(file.database_max_connections)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            header_encryption_key: env
                .header_encryption_key
                .or(file.header_encryption_key)
                .ok_or(ConfigError::Missing("HEADER_ENCRYPTION_KEY"))?,
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            probe_interval_secs: env
                .probe_interval_secs
                .or(file.probe_interval_secs)
                .unwrap_or(DEFAULT_PROBE_INTERVAL_SECS),
            max_concurrent_probes: env.max_concurrent_probes.or(file.max_concurrent_probes),
            analytics_interval_secs: env
                .analytics_interval_secs
                .or(file.analytics_interval_secs)
                .unwrap_or(DEFAULT_ANALYTICS_INTERVAL_SECS),
            check_window_secs: env
                .check_window_secs
                .or(file.check_window_secs)
                .unwrap_or(analytics_defaults.check_window_secs),
            baseline_window_secs: env
                .baseline_window_secs
                .or(file.baseline_window_secs)
                .unwrap_or(analytics_defaults.baseline_window_secs),
            reliability_threshold_percent: env
                .reliability_threshold_percent
                .or(file.reliability_threshold_percent)
                .unwrap_or(analytics_defaults.reliability_threshold_percent),
            min_samples: env
                .min_samples
                .or(file.min_samples)
                .unwrap_or(analytics_defaults.min_samples),
            degradation_factor: env
                .degradation_factor
                .or(file.degradation_factor)
                .unwrap_or(analytics_defaults.degradation_factor),
            retention_days: env
                .retention_days
                .or(file.retention_days)
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            prune_interval_secs: env
                .prune_interval_secs
                .or(file.prune_interval_secs)
                .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS),
            notification_timeout_secs: env
                .notification_timeout_secs
                .or(file.notification_timeout_secs)
                .unwrap_or(DEFAULT_NOTIFICATION_TIMEOUT_SECS),
            notification_channels: file_config.notification_channels,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        for (name, value) in [
            ("probe_interval_secs", self.probe_interval_secs),
            ("analytics_interval_secs", self.analytics_interval_secs),
            ("check_window_secs", self.check_window_secs),
            ("baseline_window_secs", self.baseline_window_secs),
            ("prune_interval_secs", self.prune_interval_secs),
            ("notification_timeout_secs", self.notification_timeout_secs),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        for (name, value) in [
            ("check_window_secs", self.check_window_secs),
            ("baseline_window_secs", self.baseline_window_secs),
        ] {
            if value > MAX_WINDOW_SECS {
                return invalid(format!("{name} must be at most {MAX_WINDOW_SECS}, got {value}"));
            }
        }
        if self.baseline_window_secs <= self.check_window_secs {
            return invalid(format!(
                "baseline_window_secs ({}) must be longer than check_window_secs ({})",
                self.baseline_window_secs, self.check_window_secs
            ));
        }
        if !(0.0..=100.0).contains(&self.reliability_threshold_percent) {
            return invalid(format!(
                "reliability_threshold_percent must be within 0..=100, got {}",
                self.reliability_threshold_percent
            ));
        }
        if self.degradation_factor <= 1.0 || !self.degradation_factor.is_finite() {
            return invalid(format!(
                "degradation_factor must be greater than 1, got {}",
                self.degradation_factor
            ));
        }
        if self.min_samples < 1 {
            return invalid(format!("min_samples must be at least 1, got {}", self.min_samples));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return invalid(format!(
                "retention_days must be within 1..={MAX_RETENTION_DAYS}, got {}",
                self.retention_days
            ));
        }
        if self.database_max_connections == 0 {
            return invalid("database_max_connections must be greater than zero".to_string());
        }
        let key = self.header_encryption_key.trim();
        if key.len() != 64 || hex::decode(key).is_err() {
            return invalid("header_encryption_key must be 64 hex characters".to_string());
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn analytics_interval(&self) -> Duration {
        Duration::from_secs(self.analytics_interval_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn analytics_settings(&self) -> AnalyticsSettings {
        AnalyticsSettings {
            check_window_secs: self.check_window_secs,
            baseline_window_secs: self.baseline_window_secs,
            reliability_threshold_percent: self.reliability_threshold_percent,
            min_samples: self.min_samples,
            degradation_factor: self.degradation_factor,
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
