//! Materializer status feature

pub mod queries;
pub mod routes;

pub use routes::{materializer_routes, StatusState};
