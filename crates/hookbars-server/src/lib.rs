//! Hookbars Server Library
//!
//! Ingests trading-platform webhooks into an append-only Postgres log and
//! materializes the BAR records they carry into a deduplicated `bars` table.
//!
//! # Overview
//!
//! - **Receiver** (`features::webhook`): authenticates deliveries and appends
//!   them to `raw_events`.
//! - **Materializer** (`materializer`): a background loop that, per cycle,
//!   locks the checkpoint row, fetches the next batch after it, extracts bars,
//!   inserts them by dedup key and advances the checkpoint in one transaction.
//! - **Export** (`features::bars`, `features::materializer`): read-only
//!   queries over bars and materializer progress.
//!
//! # Example
//!
//! ```no_run
//! use hookbars_server::{config::Config, db, materializer::{Materializer, PgCheckpointStore}};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::run_migrations(&pool).await?;
//!
//!     let store = PgCheckpointStore::from_config(pool, &config);
//!     let shutdown = CancellationToken::new();
//!     let handle = Materializer::new(store, config.materializer.clone()).spawn(shutdown.clone());
//!
//!     shutdown.cancel();
//!     handle.await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod materializer;
pub mod middleware;
pub mod models;

pub use error::{ApiResult, AppError};
