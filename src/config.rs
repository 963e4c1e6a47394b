//! Application configuration.
//!
//! Loaded from optional `stocksync.toml` / `config/stocksync.toml` files (or an explicit path),
//! then `STOCKSYNC_*` environment variables with `__` between nested keys, for example
//! `STOCKSYNC_EXECUTION__BATCH_TIMEOUT_SECS=120`.

use broker_connectors::smartapi::SmartApiConfig;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stocksync_core::ExecutionConfig;
use stocksync_database::DatabaseConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: SmartApiConfig,
    pub execution: ExecutionConfig,
    pub paper: PaperConfig,
    pub logging: LoggingConfig,
}

/// Settings for the in-process paper brokerage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Quote returned for symbols without an explicit price
    pub fallback_price: Decimal,
    /// Fixed quotes by trading symbol, e.g. `[paper.prices] NIFTY25AUG24500CE = 182.4`
    pub prices: HashMap<String, Decimal>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fallback_price: Decimal::new(100, 0),
            prices: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_name: "stocksync.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration; `path` replaces the default file locations when given
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder
                .add_source(File::with_name("stocksync").required(false))
                .add_source(File::with_name("config/stocksync").required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix("STOCKSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate().map_err(ConfigError::Message)?;
        self.execution.validate().map_err(ConfigError::Message)?;

        if self.broker.base_url.trim().is_empty() {
            return Err(ConfigError::Message("broker base URL cannot be empty".to_string()));
        }
        if self.broker.requests_per_second == 0 {
            return Err(ConfigError::Message(
                "broker requests_per_second must be greater than 0".to_string(),
            ));
        }
        if self.paper.fallback_price <= Decimal::ZERO {
            return Err(ConfigError::Message(
                "paper fallback price must be positive".to_string(),
            ));
        }
        if let Some((symbol, _)) = self.paper.prices.iter().find(|(_, p)| **p <= Decimal::ZERO) {
            return Err(ConfigError::Message(format!(
                "paper price for {symbol} must be positive"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.entry_attempts, 5);
        assert_eq!(config.execution.exit_attempts, 3);
        assert_eq!(config.logging.file_name, "stocksync.log");
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let mut config = AppConfig::default();
        config.execution.exit_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_paper_price_is_rejected() {
        let mut config = AppConfig::default();
        config.paper.prices.insert("XYZ25AUG100CE".into(), Decimal::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_database_url_is_rejected() {
        let mut config = AppConfig::default();
        config.database.database_url = String::new();
        assert!(config.validate().is_err());
    }
}
