//! Database access
//!
//! Connection pool setup plus one module per table. Functions that must run
//! inside the materializer's unit of work take `&mut PgConnection` so they can
//! be called on a transaction; read-only helpers take the pool.

pub mod bars;
pub mod checkpoint;
pub mod raw_events;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;

/// SQLSTATE `lock_not_available`, raised by `NOWAIT` and `lock_timeout`
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE `query_canceled`, raised by `statement_timeout`
const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// Database operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Any other SQL or driver error
    #[error("Database query failed: {0}")]
    Sqlx(#[source] sqlx::Error),

    /// Connection settings are invalid
    #[error("Database configuration error: {0}. Check DATABASE_URL and connection settings.")]
    Config(String),

    /// The checkpoint row is locked by another worker
    #[error("Checkpoint lock is held by another worker")]
    LockUnavailable,

    /// A pool, lock or statement timeout expired
    #[error("Database operation timed out: {0}")]
    Timeout(String),

    /// The store could not be reached
    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::LockUnavailable | DbError::Timeout(_) | DbError::Unavailable(_) => true,
            DbError::Config(_) => false,
            DbError::Sqlx(_) => true,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::Timeout("pool acquire timed out".to_string()),
            sqlx::Error::PoolClosed => DbError::Unavailable("pool closed".to_string()),
            sqlx::Error::Io(io) => DbError::Unavailable(io.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                match code.as_deref() {
                    Some(SQLSTATE_LOCK_NOT_AVAILABLE) => DbError::LockUnavailable,
                    Some(SQLSTATE_QUERY_CANCELED) => {
                        DbError::Timeout(db_err.message().to_string())
                    },
                    _ => DbError::Sqlx(sqlx::Error::Database(db_err)),
                }
            },
            other => DbError::Sqlx(other),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Build the connection pool
///
/// The SSL mode from configuration overrides any `sslmode` in the URL.
pub async fn create_pool(config: &DatabaseConfig) -> DbResult<PgPool> {
    let mut connect = PgConnectOptions::from_str(&config.url)
        .map_err(|e| DbError::config(format!("invalid DATABASE_URL: {}", e)))?
        .ssl_mode(config.ssl_mode.into());

    if let Some(ref root_cert) = config.ssl_root_cert {
        connect = connect.ssl_root_cert(root_cert.as_str());
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect_with(connect)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        ssl_mode = config.ssl_mode.as_str(),
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply the embedded migrations
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}

/// Bound lock waits and statement run time for the current transaction
///
/// Uses `set_config(..., true)`, i.e. `SET LOCAL`, so the values revert when
/// the transaction ends.
pub async fn set_local_timeouts(
    conn: &mut PgConnection,
    lock_timeout: Duration,
    statement_timeout: Duration,
) -> DbResult<()> {
    sqlx::query(
        "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)",
    )
    .bind(format!("{}ms", lock_timeout.as_millis()))
    .bind(format!("{}ms", statement_timeout.as_millis()))
    .execute(conn)
    .await?;

    Ok(())
}
