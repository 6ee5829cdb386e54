//! List bars query
//!
//! Newest bars first in log order, i.e. by `(raw_event_id, element_index)`
//! descending, optionally filtered by symbol and timeframe. Paging is a
//! keyset over that same key: `before` alone skips whole raw events, `before`
//! plus `before_index` resumes inside one.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::db::DbResult;
use crate::models::Bar;

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBarsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tf_sec: Option<i32>,
    /// Defaults to 100, clamped to 1-1000
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Only bars from raw events with a lower id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
    /// With `before`, also bars of raw event `before` below this index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_index: Option<i32>,
}

impl ListBarsQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Symbol in stored form (trimmed, upper-case); blank means no filter
    pub fn symbol(&self) -> Option<String> {
        self.symbol
            .as_deref()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if matches!(self.tf_sec, Some(tf) if tf <= 0) {
            return Err("tf_sec must be a positive integer");
        }
        if matches!(self.before, Some(before) if before <= 0) {
            return Err("before must be a positive raw event id");
        }
        if matches!(self.before_index, Some(index) if index < 0) {
            return Err("before_index must not be negative");
        }
        if self.before_index.is_some() && self.before.is_none() {
            return Err("before_index requires before");
        }
        Ok(())
    }
}

/// Position of the last bar on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageCursor {
    pub before: i64,
    pub before_index: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListBarsResponse {
    pub bars: Vec<Bar>,
    /// Pass as `before` / `before_index` for the next page; absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<PageCursor>,
}

/// Cursor after `bars` when the page came back full
pub fn next_cursor(bars: &[Bar], limit: i64) -> Option<PageCursor> {
    if (bars.len() as i64) < limit {
        return None;
    }
    bars.last().map(|bar| PageCursor {
        before: bar.raw_event_id,
        before_index: bar.element_index,
    })
}

pub async fn handle(pool: PgPool, query: ListBarsQuery) -> DbResult<ListBarsResponse> {
    let limit = query.limit();

    let mut builder = QueryBuilder::<Postgres>::new(
        r#"
        SELECT dedup, raw_event_id, received_at, element_index, symbol, tf_sec, bar_time,
               open, high, low, close, volume, vwap, trade_count,
               buy_volume, sell_volume, delta, spread_bps, imbalance,
               record, materialized_at
        FROM bars
        WHERE TRUE
        "#,
    );

    if let Some(symbol) = query.symbol() {
        builder.push(" AND symbol = ").push_bind(symbol);
    }
    if let Some(tf_sec) = query.tf_sec {
        builder.push(" AND tf_sec = ").push_bind(tf_sec);
    }
    match (query.before, query.before_index) {
        (Some(before), Some(index)) => {
            builder
                .push(" AND (raw_event_id, element_index) < (")
                .push_bind(before)
                .push(", ")
                .push_bind(index)
                .push(")");
        },
        (Some(before), None) => {
            builder.push(" AND raw_event_id < ").push_bind(before);
        },
        _ => {},
    }

    builder
        .push(" ORDER BY raw_event_id DESC, element_index DESC LIMIT ")
        .push_bind(limit);

    let bars = builder.build_query_as::<Bar>().fetch_all(&pool).await?;
    let next = next_cursor(&bars, limit);

    Ok(ListBarsResponse { bars, next })
}
