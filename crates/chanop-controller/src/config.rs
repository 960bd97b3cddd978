use std::time::Duration;

use chanop_slack::{DEFAULT_API_URL, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    /// Retry policy for every outbound API call
    #[serde(default)]
    pub transport: RetryPolicy,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slack.token.trim().is_empty() {
            return Err(ConfigError::invalid(
                "slack.token must be set (or SLACK_API_TOKEN)",
            ));
        }
        if self.slack.api_url.trim().is_empty() {
            return Err(ConfigError::invalid("slack.api_url must not be empty"));
        }
        if self.transport.retry_max == 0 {
            return Err(ConfigError::invalid("transport.retry_max must be > 0"));
        }
        if self.transport.wait_min > self.transport.wait_max {
            return Err(ConfigError::invalid(
                "transport.wait_min must not exceed transport.wait_max",
            ));
        }
        if self.transport.timeout.is_zero() || self.transport.connect_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "transport.timeout and transport.connect_timeout must be > 0",
            ));
        }
        if self.controller.status_conflict_retries == 0 {
            return Err(ConfigError::invalid(
                "controller.status_conflict_retries must be > 0",
            ));
        }
        if self.controller.max_concurrent_reconciles == 0 {
            return Err(ConfigError::invalid(
                "controller.max_concurrent_reconciles must be > 0",
            ));
        }
        if self.controller.resync_interval.is_zero() {
            return Err(ConfigError::invalid(
                "controller.resync_interval must be > 0",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bot token. Prefer CHANOP__SLACK__TOKEN or SLACK_API_TOKEN over the file.
    #[serde(default)]
    pub token: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
        }
    }
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Tuning for the reconcile loop and status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Delay before a failed key is reconciled again.
    #[serde(default = "default_error_requeue_delay", with = "humantime_serde")]
    pub error_requeue_delay: Duration,
    /// Every key is re-enqueued at this interval to catch remote drift.
    #[serde(default = "default_resync_interval", with = "humantime_serde")]
    pub resync_interval: Duration,
    /// Attempts for a status or finalizer write that hits a version conflict.
    #[serde(default = "default_status_conflict_retries")]
    pub status_conflict_retries: u32,
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
}

fn default_error_requeue_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_resync_interval() -> Duration {
    Duration::from_secs(600)
}
fn default_status_conflict_retries() -> u32 {
    5
}
fn default_max_concurrent_reconciles() -> usize {
    4
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            error_requeue_delay: default_error_requeue_delay(),
            resync_interval: default_resync_interval(),
            status_conflict_retries: default_status_conflict_retries(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use crate::error::ConfigError;
    use config::{Config, Environment, File};
    use serde::de::IntoDeserializer;
    use serde::de::value::{Error as ValueError, StrDeserializer};
    use std::path::PathBuf;
    use std::time::Duration;

    pub const DEFAULT_CONFIG_PATH: &str = "chanop.toml";

    /// Variables read by earlier deployments, applied after everything else.
    const LEGACY_TOKEN: &str = "SLACK_API_TOKEN";
    const LEGACY_RETRY_MAX: &str = "SLACK_API_RETRY_MAX";
    const LEGACY_WAIT_MIN: &str = "SLACK_API_RETRY_WAIT_MIN";
    const LEGACY_WAIT_MAX: &str = "SLACK_API_RETRY_WAIT_MAX";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(ConfigError::invalid(format!(
                "config file {} does not exist",
                pathbuf.display()
            )));
        }
        // Environment variable overrides, e.g., CHANOP__TRANSPORT__RETRY_MAX=10
        builder = builder.add_source(
            Environment::with_prefix("CHANOP")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder.build()?;
        let mut merged: AppConfig = cfg.try_deserialize()?;
        apply_legacy_env(&mut merged)?;
        merged.validate()?;
        Ok(merged)
    }

    fn legacy(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    fn legacy_duration(name: &str) -> Result<Option<Duration>, ConfigError> {
        legacy(name)
            .map(|v| {
                let de: StrDeserializer<'_, ValueError> = v.trim().into_deserializer();
                humantime_serde::deserialize::<Duration, _>(de)
                    .map_err(|e| ConfigError::invalid(format!("{name}: {e}")))
            })
            .transpose()
    }

    fn apply_legacy_env(cfg: &mut AppConfig) -> Result<(), ConfigError> {
        if let Some(token) = legacy(LEGACY_TOKEN) {
            cfg.slack.token = token;
        }
        if let Some(retry_max) = legacy(LEGACY_RETRY_MAX) {
            cfg.transport.retry_max = retry_max
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(format!("{LEGACY_RETRY_MAX}: {e}")))?;
        }
        if let Some(wait_min) = legacy_duration(LEGACY_WAIT_MIN)? {
            cfg.transport.wait_min = wait_min;
        }
        if let Some(wait_max) = legacy_duration(LEGACY_WAIT_MAX)? {
            cfg.transport.wait_max = wait_max;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        AppConfig {
            slack: SlackConfig {
                token: "xoxb-test".into(),
                ..SlackConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = valid();
        assert_eq!(cfg.slack.api_url, "https://slack.com/api");
        assert_eq!(cfg.transport.retry_max, 1000);
        assert_eq!(cfg.controller.error_requeue_delay, Duration::from_secs(30));
        assert_eq!(cfg.controller.status_conflict_retries, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AppConfig::default().validate().is_err());

        let mut cfg = valid();
        cfg.transport.retry_max = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.transport.wait_min = Duration::from_secs(120);
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.transport.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.controller.max_concurrent_reconciles = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let rendered = format!("{:?}", valid().slack);
        assert!(!rendered.contains("xoxb-test"));
    }
}
