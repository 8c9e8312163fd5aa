use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Daily-invalidation and data-date-probe configuration
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub database: String,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Maximum number of connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout_sec")]
    pub connection_timeout_sec: u64,

    /// Enable TLS/SSL
    #[serde(default)]
    pub use_tls: bool,
}

impl DatabaseConfig {
    /// Build PostgreSQL connection string
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} connect_timeout={}",
            self.host, self.port, self.database, self.user, self.password, self.connection_timeout_sec
        )
    }
}

/// Controls how often the data-date probe is re-checked and how stale a
/// `last_refresh` bookkeeping entry may be before a new calendar day
/// triggers `checkAndTriggerDailyRefresh` to invalidate everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// How long a `DataDateProbe` reading is trusted before re-querying the
    /// latest available trading day.
    #[serde(default = "default_probe_ttl_sec")]
    pub probe_ttl_sec: u64,
}

impl RefreshConfig {
    pub fn probe_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_ttl_sec)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { probe_ttl_sec: default_probe_ttl_sec() }
    }
}

fn default_max_connections() -> usize {
    10
}

fn default_connection_timeout_sec() -> u64 {
    5
}

fn default_probe_ttl_sec() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "bt_cache".to_string(),
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                max_connections: default_max_connections(),
                connection_timeout_sec: default_connection_timeout_sec(),
                use_tls: false,
            },
            refresh: RefreshConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self, crate::error::CacheError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::error::CacheError::ConfigError(e.to_string()))?;

        let config: CacheConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::error::CacheError> {
        let config: CacheConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: &str) -> Result<(), crate::error::CacheError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|e| crate::error::CacheError::ConfigError(e.to_string()))?;
        Ok(())
    }
}
