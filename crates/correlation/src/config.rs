// Storage configuration
//
// Read from environment variables (optionally seeded from a .env file):
// - DATABASE_URL (required)
// - CORRELATION_DB_MAX_CONNECTIONS (default 10)
// - CORRELATION_DB_MIN_CONNECTIONS (default 0)
// - CORRELATION_DB_ACQUIRE_TIMEOUT_SECS (default 30)
// - CORRELATION_DB_ENSURE_SCHEMA (default true)

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;

use crate::error::Result;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the correlation store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Create the correlations table on initialize if it is missing
    #[serde(default = "default_ensure_schema")]
    pub ensure_schema: bool,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_secs() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_SECS
}

fn default_ensure_schema() -> bool {
    true
}

impl StorageConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            ensure_schema: true,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_ensure_schema(mut self, ensure: bool) -> Self {
        self.ensure_schema = ensure;
        self
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> AnyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let config = Self {
            database_url,
            max_connections: parse_var(
                &lookup,
                "CORRELATION_DB_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            min_connections: parse_var(&lookup, "CORRELATION_DB_MIN_CONNECTIONS", 0)?,
            acquire_timeout_secs: parse_var(
                &lookup,
                "CORRELATION_DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?,
            ensure_schema: parse_var(&lookup, "CORRELATION_DB_ENSURE_SCHEMA", true)?,
        };

        anyhow::ensure!(
            config.min_connections <= config.max_connections,
            "CORRELATION_DB_MIN_CONNECTIONS ({}) exceeds CORRELATION_DB_MAX_CONNECTIONS ({})",
            config.min_connections,
            config.max_connections
        );

        Ok(config)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Pool options derived from this configuration
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> AnyResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value {:?} for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}
