//! Materialized bar table

use sqlx::postgres::{PgConnection, PgPool};

use super::DbResult;
use crate::models::NewBar;

/// Insert `bar` unless its dedup key is already stored
///
/// Returns `true` when a row was written. An existing row is never touched,
/// so the first delivery of a key wins.
pub async fn insert_if_absent(conn: &mut PgConnection, bar: &NewBar) -> DbResult<bool> {
    let m = &bar.measurements;

    let result = sqlx::query(
        r#"
        INSERT INTO bars (
            dedup, raw_event_id, received_at, element_index, symbol, tf_sec, bar_time,
            open, high, low, close, volume, vwap, trade_count,
            buy_volume, sell_volume, delta, spread_bps, imbalance, record
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            $8, $9, $10, $11, $12, $13, $14,
            $15, $16, $17, $18, $19, $20
        )
        ON CONFLICT (dedup) DO NOTHING
        "#,
    )
    .bind(&bar.dedup)
    .bind(bar.raw_event_id)
    .bind(bar.received_at)
    .bind(bar.element_index)
    .bind(&bar.symbol)
    .bind(bar.tf_sec)
    .bind(bar.bar_time)
    .bind(m.open)
    .bind(m.high)
    .bind(m.low)
    .bind(m.close)
    .bind(m.volume)
    .bind(m.vwap)
    .bind(m.trade_count)
    .bind(m.buy_volume)
    .bind(m.sell_volume)
    .bind(m.delta)
    .bind(m.spread_bps)
    .bind(m.imbalance)
    .bind(&bar.record)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn count(pool: &PgPool) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bars")
        .fetch_one(pool)
        .await?;

    Ok(count)
}
