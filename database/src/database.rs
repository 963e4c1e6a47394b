//! # PostgreSQL Database Integration
//!
//! Connection pool ownership for the Postgres stores.

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, error, info, instrument};

use crate::config::DatabaseConfig;
use crate::postgres::PgStore;

/// Database manager for PostgreSQL operations
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// Create a new database manager with the given configuration
    #[instrument(skip(config))]
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        info!("Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.database_url)
            .await?;

        // Test the connection
        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&pool)
            .await?;

        info!("Connected to PostgreSQL: {}", version);

        Ok(Self { pool })
    }

    /// Account, instrument and ledger stores sharing this pool
    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }

    /// Check database health
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing database health check");

        let result: (i32,) = sqlx::query_as("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        if result.0 == 1 {
            info!("Database health check passed");
            Ok(())
        } else {
            error!("Database health check failed");
            Err(anyhow::anyhow!("Health check returned unexpected result"))
        }
    }

    /// Get connection pool size
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }
}
