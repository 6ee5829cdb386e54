//! Bars feature module
//!
//! Public read-only access to the materialized bar table.

pub mod queries;
pub mod routes;

pub use routes::bars_routes;
