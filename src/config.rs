use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Journal backing the store; `None` keeps everything in memory.
    pub journal_path: Option<PathBuf>,
    /// Number of minor units digits in one major unit (2 for cents).
    pub currency_exponent: u32,
    /// Maximum number of feed items returned per call.
    pub feed_page_size: usize,
    /// Age after which an unsettled transfer intent is failed by reconciliation.
    pub stale_intent_after_secs: u64,
    /// `tracing_subscriber::EnvFilter` directive used by the binary.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_path: None,
            currency_exponent: 2,
            feed_page_size: 20,
            stale_intent_after_secs: 300,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("LEDGER_JOURNAL") {
            config.journal_path = Some(PathBuf::from(path));
        }
        if let Ok(value) = std::env::var("LEDGER_CURRENCY_EXPONENT") {
            config.currency_exponent = parse_var("LEDGER_CURRENCY_EXPONENT", &value)?;
        }
        if let Ok(value) = std::env::var("LEDGER_FEED_PAGE_SIZE") {
            config.feed_page_size = parse_var("LEDGER_FEED_PAGE_SIZE", &value)?;
        }
        if let Ok(value) = std::env::var("LEDGER_STALE_INTENT_SECS") {
            config.stale_intent_after_secs = parse_var("LEDGER_STALE_INTENT_SECS", &value)?;
        }
        if let Ok(filter) = std::env::var("LEDGER_LOG") {
            config.log_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency_exponent > 9 {
            return Err(ConfigError::Invalid(format!(
                "currency_exponent must be at most 9, got {}",
                self.currency_exponent
            )));
        }
        if self.feed_page_size == 0 {
            return Err(ConfigError::Invalid(
                "feed_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stale_intent_after(&self) -> Duration {
        Duration::from_secs(self.stale_intent_after_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} has an invalid value `{value}`")))
}
