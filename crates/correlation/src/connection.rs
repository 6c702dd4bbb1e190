// Connection lifecycle
//
// The repository does not own pooling. It asks an injected ConnectionProvider
// for a pool and hands it back on dispose. PgConnectionProvider keeps one pool
// per database URL, so repositories sharing a config share a pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::StorageConfig;
use crate::error::Result;

/// Source of database connections
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Get (or open) the pool for a configuration
    async fn get_connection(&self, config: &StorageConfig) -> Result<PgPool>;

    /// Close the pool for a configuration. Unknown configurations are a no-op.
    async fn destroy_connection(&self, config: &StorageConfig) -> Result<()>;
}

/// Pool cache keyed by database URL
#[derive(Default)]
pub struct PgConnectionProvider {
    pools: Mutex<HashMap<String, PgPool>>,
    lazy: bool,
}

impl PgConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose pools defer connecting until first use
    pub fn lazy() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            lazy: true,
        }
    }

    pub fn shared() -> Arc<dyn ConnectionProvider> {
        Arc::new(Self::new())
    }

    /// Number of cached pools
    pub async fn open_connections(&self) -> usize {
        self.pools.lock().await.len()
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    async fn get_connection(&self, config: &StorageConfig) -> Result<PgPool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&config.database_url) {
            return Ok(pool.clone());
        }

        let options = config.pool_options();
        let pool = if self.lazy {
            options.connect_lazy(&config.database_url)
        } else {
            options.connect(&config.database_url).await
        }
        .map_err(|e| {
            error!("Failed to open database connection: {}", e);
            e
        })?;

        info!(
            max_connections = config.max_connections,
            "Opened correlation database pool"
        );
        pools.insert(config.database_url.clone(), pool.clone());
        Ok(pool)
    }

    async fn destroy_connection(&self, config: &StorageConfig) -> Result<()> {
        let pool = self.pools.lock().await.remove(&config.database_url);
        if let Some(pool) = pool {
            pool.close().await;
            debug!("Closed correlation database pool");
        }
        Ok(())
    }
}
