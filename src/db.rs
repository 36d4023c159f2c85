use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections.min(cfg.db_max_connections),
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

impl DbConfig {
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    /// Pool settings actually applied. SQLite gets one connection: two
    /// deferred writers on separate connections fail with `database is
    /// locked` rather than waiting, so writers queue at acquire instead.
    pub fn effective(&self) -> DbConfig {
        let mut config = self.clone();
        if config.is_sqlite() && config.max_connections > 1 {
            warn!(
                requested = config.max_connections,
                "SQLite pool limited to a single connection"
            );
            config.max_connections = 1;
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let config = &config.effective();
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("bstock_db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection failed");
        counter!("bstock_db.connection_failures", 1);
        ServiceError::DatabaseError(e)
    })?;

    info!(
        backend = ?pool.get_database_backend(),
        "Database connection pool established"
    );
    Ok(pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs the embedded schema migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let start = std::time::Instant::now();
    let result = pool.ping().await.map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!("bstock_db.connection_latency", elapsed.as_millis() as f64);
        }
        Err(e) => {
            error!("Database connection check failed after {:?}: {}", elapsed, e);
            counter!("bstock_db.connection_failures", 1);
        }
    }

    result
}

/// Closes the database connection pool
pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("Closing database connection pool");
    pool.close().await.map_err(ServiceError::DatabaseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_pool(max: u32, min: u32) -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "a_sufficiently_long_signing_key_for_unit_tests_with_many_distinct_chars_9f3".into(),
            "127.0.0.1".into(),
            0,
            "development".into(),
        );
        cfg.db_max_connections = max;
        cfg.db_min_connections = min;
        cfg
    }

    #[test]
    fn min_connections_never_exceed_max() {
        let db_cfg = DbConfig::from(&config_with_pool(1, 4));
        assert_eq!(db_cfg.max_connections, 1);
        assert_eq!(db_cfg.min_connections, 1);
    }

    #[test]
    fn sqlite_pool_is_limited_to_one_connection() {
        let db_cfg = DbConfig::from(&config_with_pool(16, 2)).effective();
        assert_eq!(db_cfg.max_connections, 1);
        assert_eq!(db_cfg.min_connections, 1);
    }

    #[test]
    fn server_backends_keep_configured_pool() {
        let db_cfg = DbConfig {
            url: "postgres://localhost/bstock".into(),
            max_connections: 16,
            min_connections: 2,
            ..DbConfig::default()
        }
        .effective();
        assert_eq!(db_cfg.max_connections, 16);
        assert_eq!(db_cfg.min_connections, 2);
    }

    #[tokio::test]
    async fn migrations_apply_to_fresh_database() {
        let pool = establish_connection_from_app_config(&config_with_pool(4, 1))
            .await
            .expect("connect");
        run_migrations(&pool).await.expect("migrate");
        check_connection(&pool).await.expect("ping");
        close_pool(pool).await.expect("close");
    }
}
