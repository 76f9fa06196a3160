use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    #[error("Invalid database configuration: {0}")]
    InvalidConfig(String),
}

/// Owns the Postgres connection pool shared by every repository.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if config.pool_max_connections == 0 {
            return Err(DatabaseError::InvalidConfig(
                "pool_max_connections must be greater than 0".to_string(),
            ));
        }

        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_connections)
            .min_connections(config.pool_min_connections)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.pool_max_connections,
            "Database connection pool established"
        );

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(DatabaseError::MigrationFailed)?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_empty_pool() {
        let config = DatabaseConfig {
            pool_max_connections: 0,
            ..Default::default()
        };
        let result = Database::connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::InvalidConfig("pool_max_connections".to_string());
        assert!(err.to_string().contains("pool_max_connections"));
    }
}
