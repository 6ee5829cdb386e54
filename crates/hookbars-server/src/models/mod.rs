//! Row types for the raw event log, the checkpoint and the bar table

pub mod bar;

pub use bar::{Bar, Measurements, NewBar};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the append-only raw event log (`raw_events`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawEvent {
    /// Assigned by the log; strictly increasing in commit order
    pub id: i64,
    pub received_at: DateTime<Utc>,
    /// Route tag the payload arrived on, e.g. `tradingview`
    pub route: String,
    pub payload: serde_json::Value,
}

/// The singleton materializer cursor (`materializer_checkpoint`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkpoint {
    pub last_processed_id: i64,
    pub updated_at: DateTime<Utc>,
}
