//! Feature modules implementing the hookbars HTTP surface
//!
//! - **webhook**: authenticated ingestion into the raw event log
//! - **bars**: read-only export of materialized bars
//! - **materializer**: checkpoint position, lag and loop state
//!
//! Each feature owns its `routes.rs` and, for reads, a `queries/` module.

pub mod bars;
pub mod materializer;
pub mod webhook;

use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::ReceiverConfig;
use crate::materializer::MaterializerState;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub db: sqlx::PgPool,
    pub receiver: Arc<ReceiverConfig>,
    /// Route tag the materializer consumes
    pub materializer_route: String,
    pub materializer_state: Option<watch::Receiver<MaterializerState>>,
}

/// Routes mounted under `/api/v1`
///
/// - `/bars` - bar export
/// - `/materializer/status` - materializer progress
pub fn router(state: FeatureState) -> Router<()> {
    let status_state = materializer::StatusState {
        db: state.db.clone(),
        route: state.materializer_route.clone(),
        state: state.materializer_state.clone(),
    };

    Router::new()
        .nest("/bars", bars::bars_routes().with_state(state.db.clone()))
        .nest("/materializer", materializer::materializer_routes().with_state(status_state))
}

/// Routes mounted under `/webhook`, or `None` when the receiver is disabled
pub fn webhook_router(state: &FeatureState) -> Option<Router<()>> {
    state.receiver.enabled.then(|| {
        webhook::webhook_routes(webhook::WebhookState {
            db: state.db.clone(),
            receiver: state.receiver.clone(),
        })
    })
}
