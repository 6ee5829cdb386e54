//! Materializer status routes

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use tokio::sync::watch;

use super::queries::status::handle as handle_status;
use crate::api::response::ApiResponse;
use crate::error::ApiResult;
use crate::materializer::MaterializerState;

#[derive(Clone)]
pub struct StatusState {
    pub db: sqlx::PgPool,
    pub route: String,
    /// `None` when the loop does not run in this process
    pub state: Option<watch::Receiver<MaterializerState>>,
}

/// Create materializer routes
pub fn materializer_routes() -> Router<StatusState> {
    Router::new().route("/status", get(status))
}

/// Checkpoint position, lag and loop state
///
/// GET /materializer/status
async fn status(State(state): State<StatusState>) -> ApiResult<impl IntoResponse> {
    let current = state.state.as_ref().map(|rx| *rx.borrow());
    let status = handle_status(&state.db, &state.route, current).await?;
    Ok(ApiResponse::success(status))
}
