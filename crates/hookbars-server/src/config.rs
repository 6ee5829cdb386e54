//! Configuration management
//!
//! All settings come from environment variables (optionally via `.env`),
//! fall back to the `DEFAULT_*` constants below and are checked by
//! [`Config::validate`] before anything touches the database.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default pool acquire timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default Postgres `lock_timeout` for a unit of work, in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Default Postgres `statement_timeout` for a unit of work, in milliseconds.
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;

/// Bounds shared by the lock and statement timeouts, in milliseconds.
pub const STORE_TIMEOUT_RANGE_MS: (u64, u64) = (100, 600_000);

// ============================================================================
// Materializer Configuration Constants
// ============================================================================

/// Route tag the materializer consumes by default.
pub const DEFAULT_MATERIALIZER_ROUTE: &str = "tradingview";

/// Default number of raw events per cycle.
pub const DEFAULT_BATCH_SIZE: u32 = 500;

/// Allowed batch sizes.
pub const BATCH_SIZE_RANGE: (u32, u32) = (1, 5_000);

/// Default sleep after an empty or partial batch, in milliseconds.
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 1_000;

/// Allowed idle intervals, in milliseconds.
pub const IDLE_INTERVAL_RANGE_MS: (u64, u64) = (100, 60_000);

/// Default sleep after a failed cycle, in milliseconds.
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 5_000;

/// Allowed error backoff, in milliseconds.
pub const ERROR_BACKOFF_RANGE_MS: (u64, u64) = (500, 300_000);

/// Default ceiling for the doubled error backoff, in milliseconds.
pub const DEFAULT_MAX_ERROR_BACKOFF_MS: u64 = 60_000;

/// Upper bound for the error backoff ceiling, in milliseconds.
pub const MAX_ERROR_BACKOFF_LIMIT_MS: u64 = 600_000;

// ============================================================================
// Receiver Configuration Constants
// ============================================================================

/// Default maximum webhook body size (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Allowed webhook body limits.
pub const MAX_BODY_BYTES_RANGE: (usize, usize) = (1024, 10 * 1024 * 1024);

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub materializer: MaterializerConfig,
    pub receiver: ReceiverConfig,
    pub cors: CorsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Postgres transport security mode
///
/// Mirrors libpq `sslmode`. Modes that may fall back to plaintext or skip
/// certificate checks are only accepted with `DATABASE_ALLOW_INSECURE=true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    #[default]
    VerifyFull,
}

impl SslMode {
    /// Whether the mode can end up on an unauthenticated or plaintext link
    pub fn is_insecure(self) -> bool {
        matches!(self, SslMode::Disable | SslMode::Allow | SslMode::Prefer | SslMode::Require)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => anyhow::bail!("Invalid DATABASE_SSL_MODE: {}", other),
        }
    }
}

impl From<SslMode> for sqlx::postgres::PgSslMode {
    fn from(mode: SslMode) -> Self {
        use sqlx::postgres::PgSslMode;
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub ssl_mode: SslMode,
    pub ssl_root_cert: Option<String>,
    /// Explicit opt-in for `disable`/`allow`/`prefer`/`require`
    pub allow_insecure: bool,
    pub lock_timeout_ms: u64,
    pub statement_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// How `acquire()` behaves when another worker holds the checkpoint lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Wait for the lock, bounded by the lock timeout
    #[default]
    Wait,
    /// Fail immediately (`FOR UPDATE NOWAIT`)
    NoWait,
}

impl std::str::FromStr for LockMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wait" => Ok(LockMode::Wait),
            "nowait" | "no_wait" | "no-wait" => Ok(LockMode::NoWait),
            other => anyhow::bail!("Invalid MATERIALIZER_LOCK_MODE: {} (expected wait or nowait)", other),
        }
    }
}

/// Materializer loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializerConfig {
    pub enabled: bool,
    /// Route tag of raw events this worker materializes
    pub route: String,
    pub batch_size: u32,
    pub idle_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub max_error_backoff_ms: u64,
    pub lock_mode: LockMode,
}

impl MaterializerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn max_error_backoff(&self) -> Duration {
        Duration::from_millis(self.max_error_backoff_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.route.trim().is_empty() {
            anyhow::bail!("MATERIALIZER_ROUTE cannot be empty");
        }
        check_range("MATERIALIZER_BATCH_SIZE", self.batch_size, BATCH_SIZE_RANGE)?;
        check_range("MATERIALIZER_IDLE_MS", self.idle_interval_ms, IDLE_INTERVAL_RANGE_MS)?;
        check_range(
            "MATERIALIZER_ERROR_BACKOFF_MS",
            self.error_backoff_ms,
            ERROR_BACKOFF_RANGE_MS,
        )?;
        check_range(
            "MATERIALIZER_MAX_ERROR_BACKOFF_MS",
            self.max_error_backoff_ms,
            (self.error_backoff_ms, MAX_ERROR_BACKOFF_LIMIT_MS),
        )?;
        Ok(())
    }
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            route: DEFAULT_MATERIALIZER_ROUTE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            idle_interval_ms: DEFAULT_IDLE_INTERVAL_MS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            max_error_backoff_ms: DEFAULT_MAX_ERROR_BACKOFF_MS,
            lock_mode: LockMode::Wait,
        }
    }
}

/// Webhook receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub enabled: bool,
    /// Shared secret expected in `X-Webhook-Token` or `?token=`
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub max_body_bytes: usize,
    /// Route tags accepted at `/webhook/{route}`
    pub routes: Vec<String>,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        let flag = |key: &str, default: bool| -> anyhow::Result<bool> {
            Ok(parsed(lookup, key)?.unwrap_or(default))
        };
        let list = |key: &str, default: &str| -> Vec<String> {
            lookup(key)
                .unwrap_or_else(|| default.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let url = lookup("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let ssl_mode = match lookup("DATABASE_SSL_MODE") {
            Some(mode) => mode.parse()?,
            None => SslMode::default(),
        };

        let lock_mode = match lookup("MATERIALIZER_LOCK_MODE") {
            Some(mode) => mode.parse()?,
            None => LockMode::default(),
        };

        let route = lookup("MATERIALIZER_ROUTE")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_MATERIALIZER_ROUTE.to_string());

        let config = Config {
            server: ServerConfig {
                host: lookup("HOOKBARS_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
                port: parsed(lookup, "HOOKBARS_PORT")?.unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: parsed(lookup, "HOOKBARS_SHUTDOWN_TIMEOUT")?
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url,
                max_connections: parsed(lookup, "DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: parsed(lookup, "DATABASE_MIN_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: parsed(lookup, "DATABASE_CONNECT_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: parsed(lookup, "DATABASE_IDLE_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
                ssl_mode,
                ssl_root_cert: lookup("DATABASE_SSL_ROOT_CERT").filter(|s| !s.trim().is_empty()),
                allow_insecure: flag("DATABASE_ALLOW_INSECURE", false)?,
                lock_timeout_ms: parsed(lookup, "DATABASE_LOCK_TIMEOUT_MS")?.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
                statement_timeout_ms: parsed(lookup, "DATABASE_STATEMENT_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_MS),
            },
            materializer: MaterializerConfig {
                enabled: flag("MATERIALIZER_ENABLED", true)?,
                route: route.clone(),
                batch_size: parsed(lookup, "MATERIALIZER_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
                idle_interval_ms: parsed(lookup, "MATERIALIZER_IDLE_MS")?.unwrap_or(DEFAULT_IDLE_INTERVAL_MS),
                error_backoff_ms: parsed(lookup, "MATERIALIZER_ERROR_BACKOFF_MS")?
                    .unwrap_or(DEFAULT_ERROR_BACKOFF_MS),
                max_error_backoff_ms: parsed(lookup, "MATERIALIZER_MAX_ERROR_BACKOFF_MS")?
                    .unwrap_or(DEFAULT_MAX_ERROR_BACKOFF_MS),
                lock_mode,
            },
            receiver: ReceiverConfig {
                enabled: flag("RECEIVER_ENABLED", true)?,
                secret: lookup("RECEIVER_SECRET").filter(|s| !s.is_empty()),
                max_body_bytes: parsed(lookup, "RECEIVER_MAX_BODY_BYTES")?.unwrap_or(DEFAULT_MAX_BODY_BYTES),
                routes: list("RECEIVER_ROUTES", &route),
            },
            cors: CorsConfig {
                allowed_origins: list("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.database.ssl_mode.is_insecure() && !self.database.allow_insecure {
            anyhow::bail!(
                "DATABASE_SSL_MODE={} does not verify the server certificate; \
                 set DATABASE_ALLOW_INSECURE=true to accept it",
                self.database.ssl_mode.as_str()
            );
        }

        check_range(
            "DATABASE_LOCK_TIMEOUT_MS",
            self.database.lock_timeout_ms,
            STORE_TIMEOUT_RANGE_MS,
        )?;
        check_range(
            "DATABASE_STATEMENT_TIMEOUT_MS",
            self.database.statement_timeout_ms,
            STORE_TIMEOUT_RANGE_MS,
        )?;

        self.materializer.validate()?;

        if self.receiver.enabled {
            match self.receiver.secret.as_deref() {
                None => anyhow::bail!("RECEIVER_SECRET must be set when the receiver is enabled"),
                Some(secret) if secret.len() < 16 => {
                    tracing::warn!("RECEIVER_SECRET is shorter than 16 characters")
                },
                Some(_) => {},
            }
            if self.receiver.routes.is_empty() {
                anyhow::bail!("RECEIVER_ROUTES cannot be empty");
            }
            check_range(
                "RECEIVER_MAX_BODY_BYTES",
                self.receiver.max_body_bytes,
                MAX_BODY_BYTES_RANGE,
            )?;
            if self.materializer.enabled
                && !self.receiver.routes.contains(&self.materializer.route)
            {
                tracing::warn!(
                    route = %self.materializer.route,
                    "Materializer route is not accepted by the receiver"
                );
            }
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

/// `Ok(None)` when unset; an error naming `key` when set but unparseable
fn parsed<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
    }
}

fn check_range<T>(name: &str, value: T, (min, max): (T, T)) -> anyhow::Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        anyhow::bail!("{} must be between {} and {}, got {}", name, min, max, value);
    }
    Ok(())
}
