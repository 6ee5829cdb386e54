//! Append-only raw event log

use sqlx::postgres::{PgConnection, PgPool};

use super::DbResult;
use crate::models::RawEvent;

/// Advisory lock key serializing appends (ASCII "hookbars")
///
/// `BIGSERIAL` ids are handed out before commit, so two concurrent appends can
/// become visible out of id order. Holding this lock until commit keeps every
/// visible id below any id that is still in flight, which the checkpoint
/// relies on.
const APPEND_LOCK_KEY: i64 = 0x686f_6f6b_6261_7273;

/// Append one payload and return the stored event
pub async fn append(
    pool: &PgPool,
    route: &str,
    payload: &serde_json::Value,
) -> DbResult<RawEvent> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(APPEND_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let event = sqlx::query_as::<_, RawEvent>(
        r#"
        INSERT INTO raw_events (route, payload)
        VALUES ($1, $2)
        RETURNING id, received_at, route, payload
        "#,
    )
    .bind(route)
    .bind(payload)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(event)
}

/// Next slice of events on `route` with `id > after_id`, oldest first
pub async fn fetch_after(
    conn: &mut PgConnection,
    after_id: i64,
    limit: i64,
    route: &str,
) -> DbResult<Vec<RawEvent>> {
    let events = sqlx::query_as::<_, RawEvent>(
        r#"
        SELECT id, received_at, route, payload
        FROM raw_events
        WHERE id > $1 AND route = $2
        ORDER BY id ASC
        LIMIT $3
        "#,
    )
    .bind(after_id)
    .bind(route)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(events)
}

pub async fn latest_id(pool: &PgPool, route: &str) -> DbResult<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM raw_events WHERE route = $1")
        .bind(route)
        .fetch_one(pool)
        .await?;

    Ok(id)
}

/// Number of events on `route` the checkpoint has not passed yet
pub async fn count_after(pool: &PgPool, after_id: i64, route: &str) -> DbResult<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM raw_events WHERE id > $1 AND route = $2")
            .bind(after_id)
            .bind(route)
            .fetch_one(pool)
            .await?;

    Ok(count)
}
