use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::errors::{StorageError, StorageResult};
use crate::config::DatabaseConfig;

/// Pooled PostgreSQL connection built from configuration
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::query("connect", e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "🗄️ STORE: Database pool established"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> StorageResult<bool> {
        let health: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from_sqlx("health_check"))?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
