//! Database connection management for the timesheet core.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

/// Wraps the shared connection pool. Cloning is cheap (`PgPool` is an `Arc`
/// internally), matching the teacher's `Database` shape.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection, lazily. The pool is established on
    /// first use rather than at construction time.
    pub fn new(postgres_url: &str, max_connections: u32) -> Result<Self> {
        tracing::info!(max_connections, "database pool configured");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(postgres_url)?;

        Ok(Self { pool })
    }

    /// Build from an already-connected pool (used by tests and by callers
    /// that manage pool lifecycle themselves).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Verify connectivity and run pending migrations.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        self.run_migrations().await?;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> HealthStatus {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthStatus { is_healthy: true, message: "connected".to_string() },
            Err(e) => HealthStatus { is_healthy: false, message: format!("connection failed: {e}") },
        }
    }
}

#[derive(Debug)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creation_is_lazy_and_infallible() {
        let result = Database::new("postgresql://localhost/test", 10);
        assert!(result.is_ok());
    }
}
