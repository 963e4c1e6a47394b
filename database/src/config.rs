//! # Database Configuration
//!
//! Connection pool settings for the Postgres stores. Durations are plain seconds so the
//! section can be read straight out of the application config file or environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database configuration for PostgreSQL connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection acquisition timeout
    pub acquire_timeout_secs: u64,
    /// Connection idle timeout
    pub idle_timeout_secs: u64,
    /// Connection max lifetime
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost:5432/stocksync".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.trim().is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Max connections must be positive".to_string());
        }

        if self.max_connections < self.min_connections {
            return Err("Max connections must be >= min connections".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = DatabaseConfig::default();
        config.database_url = "".to_string();
        assert!(config.validate().is_err());

        let mut config = DatabaseConfig::default();
        config.min_connections = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{ "database_url": "postgresql://db/ledger" }"#).unwrap();
        assert_eq!(config.database_url, "postgresql://db/ledger");
        assert_eq!(config.max_lifetime_secs, 1800);
    }
}
