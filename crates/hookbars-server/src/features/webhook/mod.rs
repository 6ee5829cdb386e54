//! Webhook receiver feature
//!
//! The ingestion side of the pipeline: authenticated deliveries are appended
//! to `raw_events` and acknowledged with `202 Accepted`.

pub mod auth;
pub mod routes;

pub use routes::{webhook_routes, WebhookState};
