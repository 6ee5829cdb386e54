//! Materializer status query

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::db::{self, DbResult};
use crate::materializer::MaterializerState;

#[derive(Debug, Clone, Serialize)]
pub struct MaterializerStatus {
    pub route: String,
    pub last_processed_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_updated_at: Option<DateTime<Utc>>,
    /// Highest raw event id on the route, if any
    pub latest_raw_event_id: Option<i64>,
    /// Route events past the checkpoint
    pub lag: i64,
    pub bars_total: i64,
    /// Loop state in this process; `disabled` when the loop is not running here
    pub state: String,
}

pub async fn handle(
    pool: &PgPool,
    route: &str,
    state: Option<MaterializerState>,
) -> DbResult<MaterializerStatus> {
    let checkpoint = db::checkpoint::read(pool).await?;
    let last_processed_id = checkpoint.as_ref().map_or(0, |c| c.last_processed_id);

    let (latest_raw_event_id, lag, bars_total) = tokio::try_join!(
        db::raw_events::latest_id(pool, route),
        db::raw_events::count_after(pool, last_processed_id, route),
        db::bars::count(pool),
    )?;

    Ok(MaterializerStatus {
        route: route.to_string(),
        last_processed_id,
        checkpoint_updated_at: checkpoint.map(|c| c.updated_at),
        latest_raw_event_id,
        lag,
        bars_total,
        state: state.map_or_else(|| "disabled".to_string(), |s| s.to_string()),
    })
}
