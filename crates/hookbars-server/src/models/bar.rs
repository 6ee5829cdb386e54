use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric measurements of a bar; every field is independently nullable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurements {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub vwap: Option<f64>,
    pub trade_count: Option<i64>,
    pub buy_volume: Option<f64>,
    pub sell_volume: Option<f64>,
    pub delta: Option<f64>,
    pub spread_bps: Option<f64>,
    pub imbalance: Option<f64>,
}

/// A validated bar ready for insert-if-absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBar {
    pub dedup: String,
    pub raw_event_id: i64,
    pub received_at: DateTime<Utc>,
    /// Position of the element inside the payload's record list
    pub element_index: i32,
    pub symbol: String,
    pub tf_sec: i32,
    pub bar_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub measurements: Measurements,
    /// The element exactly as it appeared in the payload
    pub record: serde_json::Value,
}

/// A stored bar (`bars` row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bar {
    pub dedup: String,
    pub raw_event_id: i64,
    pub received_at: DateTime<Utc>,
    pub element_index: i32,
    pub symbol: String,
    pub tf_sec: i32,
    pub bar_time: Option<DateTime<Utc>>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub measurements: Measurements,
    pub record: serde_json::Value,
    pub materialized_at: DateTime<Utc>,
}
