//! Shared harness for Postgres-backed integration tests
//!
//! Each test starts its own PostgreSQL container with migrations applied.
//! These tests need a Docker daemon and are `#[ignore]`d by default:
//!
//! ```text
//! cargo test -p hookbars-server -- --ignored
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Once;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

use hookbars_server::config::{LockMode, MaterializerConfig};
use hookbars_server::materializer::postgres::UnitSettings;
use hookbars_server::materializer::{Materializer, PgCheckpointStore};

pub const ROUTE: &str = "tradingview";
pub const SECRET: &str = "0123456789abcdef";

static TRACING: Once = Once::new();

/// Route test logs through the test harness writer
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("hookbars_server=debug,sqlx=warn")
            .with_test_writer()
            .try_init();
    });
}

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        init_tracing();

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        hookbars_server::db::run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a raw event with a fixed id, bypassing the append lock
    pub async fn insert_event(&self, id: i64, payload: Value) -> Result<()> {
        sqlx::query("INSERT INTO raw_events (id, route, payload) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(ROUTE)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn checkpoint(&self) -> Result<i64> {
        let id = sqlx::query_scalar(
            "SELECT last_processed_id FROM materializer_checkpoint WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn reset_checkpoint(&self) -> Result<()> {
        sqlx::query("UPDATE materializer_checkpoint SET last_processed_id = 0 WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn bar_count(&self) -> Result<i64> {
        Ok(hookbars_server::db::bars::count(&self.pool).await?)
    }

    pub fn materializer(&self, lock_mode: LockMode) -> Materializer<PgCheckpointStore> {
        let store = PgCheckpointStore::new(
            self.pool.clone(),
            UnitSettings {
                lock_mode,
                lock_timeout: Duration::from_millis(500),
                statement_timeout: Duration::from_secs(10),
            },
        );
        Materializer::new(store, materializer_config())
    }
}

pub fn materializer_config() -> MaterializerConfig {
    MaterializerConfig {
        route: ROUTE.to_string(),
        idle_interval_ms: 100,
        error_backoff_ms: 500,
        ..MaterializerConfig::default()
    }
}
