use crate::config::DatabaseConfig;
use crate::error::{CacheError, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Connection pool manager for the result cache's Postgres backend, minus a
/// TimescaleDB-extension check: the three cache tables are plain relational
/// tables, not hypertables.
pub struct ConnectionPool {
    pool: Pool,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(
            "Creating connection pool to {}:{}/{} (max_connections: {})",
            config.host, config.port, config.database, config.max_connections
        );

        let mut pg_config = Config::new();
        pg_config.host = Some(config.host.clone());
        pg_config.port = Some(config.port);
        pg_config.dbname = Some(config.database.clone());
        pg_config.user = Some(config.user.clone());
        pg_config.password = Some(config.password.clone());

        pg_config.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(config.max_connections));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let client = pool.get().await?;
        let version: String = client.query_one("SELECT version()", &[]).await.map(|row| row.get(0))?;
        info!("Connected to PostgreSQL: {}", version);

        debug!("Connection pool created successfully");

        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub async fn get(&self) -> Result<deadpool_postgres::Client> {
        self.pool.get().await.map_err(|e| e.into())
    }

    /// Get pool status
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus { size: status.size, available: status.available, waiting: status.waiting, max_size: status.max_size }
    }

    /// Execute a schema migration script inside a transaction.
    pub async fn execute_schema(&self, sql: &str) -> Result<()> {
        let mut client = self.get().await?;

        let transaction = client.transaction().await.map_err(|e| CacheError::SchemaError(e.to_string()))?;

        transaction.batch_execute(sql).await.map_err(|e| CacheError::SchemaError(e.to_string()))?;

        transaction.commit().await.map_err(|e| CacheError::SchemaError(e.to_string()))?;

        info!("Schema executed successfully");
        Ok(())
    }

    /// Create the three result-cache tables if they don't already exist.
    pub async fn init_schemas(&self) -> Result<()> {
        info!("Initializing cache schemas");
        self.execute_schema(crate::store::SCHEMA_SQL).await?;
        info!("Cache schemas initialized");
        Ok(())
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> Result<bool> {
        let client = self.get().await?;
        let result: i32 = client.query_one("SELECT 1", &[]).await?.get(0);
        Ok(result == 1)
    }
}

/// Pool status information
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
    pub max_size: usize,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pool[size={}, available={}, waiting={}, max={}]", self.size, self.available, self.waiting, self.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "bt_cache".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 5,
            connection_timeout_sec: 5,
            use_tls: false,
        }
    }

    #[tokio::test]
    #[ignore] // Requires a running Postgres instance
    async fn test_connection_pool() {
        let pool = ConnectionPool::new(&config()).await.unwrap();
        let status = pool.status();
        assert!(status.max_size > 0);
    }

    #[tokio::test]
    #[ignore] // Requires a running Postgres instance
    async fn test_connection() {
        let pool = ConnectionPool::new(&config()).await.unwrap();
        let result = pool.test_connection().await.unwrap();
        assert!(result);
    }
}
