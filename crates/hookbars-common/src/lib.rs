//! hookbars common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Logging setup shared by the hookbars binaries and tests:
//! [`logging::LogConfig`] and [`logging::init_logging`].
//!
//! # Example
//!
//! ```no_run
//! use hookbars_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("worker starting");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LoggingGuard};
