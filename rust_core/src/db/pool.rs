//! Standardized database connection pool configuration.
//!
//! Every external call is bounded: acquire timeouts and connection
//! lifetimes come from here so no reconciliation pass can block
//! indefinitely on the store.

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database pool configuration
#[derive(Clone, Debug)]
pub struct DbPoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum lifetime of a connection (prevents stale connections)
    pub max_lifetime: Duration,
    /// Maximum idle time before a connection is closed
    pub idle_timeout: Duration,
    /// Connection acquire timeout
    pub acquire_timeout: Duration,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DbPoolConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        Self {
            max_connections: std::env::var("DB_POOL_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_POOL_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            max_lifetime: Duration::from_secs(
                std::env::var("DB_POOL_MAX_LIFETIME_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1800), // 30 minutes
            ),
            idle_timeout: Duration::from_secs(
                std::env::var("DB_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600), // 10 minutes
            ),
            acquire_timeout: Duration::from_secs(
                std::env::var("DB_POOL_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

/// Create a PostgreSQL connection pool with standardized configuration
pub async fn create_pool(database_url: &str, config: DbPoolConfig) -> Result<PgPool> {
    info!(
        "Creating database pool: max={}, min={}, acquire_timeout={:?}",
        config.max_connections, config.min_connections, config.acquire_timeout
    );

    let connect_opts =
        PgConnectOptions::from_str(database_url).context("Failed to parse database URL")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_opts)
        .await
        .context("Failed to create database pool")?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbPoolConfig::default();
        assert!(config.max_connections > 0);
        assert!(config.min_connections > 0);
        assert!(config.min_connections <= config.max_connections);
    }

    #[test]
    fn test_acquire_timeout_is_bounded() {
        let config = DbPoolConfig::from_env();
        assert!(config.acquire_timeout <= Duration::from_secs(60));
    }
}
