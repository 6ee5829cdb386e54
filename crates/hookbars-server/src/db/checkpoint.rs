//! Singleton checkpoint row

use sqlx::postgres::{PgConnection, PgPool};

use super::DbResult;
use crate::config::LockMode;
use crate::models::Checkpoint;

/// Lock the checkpoint row for the rest of the transaction
///
/// Returns the current `last_processed_id`. Re-creates the row if the seed
/// was removed so a fresh schema never stalls the loop.
pub async fn lock(conn: &mut PgConnection, mode: LockMode) -> DbResult<i64> {
    let sql = match mode {
        LockMode::Wait => {
            "SELECT last_processed_id FROM materializer_checkpoint WHERE id = 1 FOR UPDATE"
        },
        LockMode::NoWait => {
            "SELECT last_processed_id FROM materializer_checkpoint WHERE id = 1 FOR UPDATE NOWAIT"
        },
    };

    if let Some(id) = sqlx::query_scalar::<_, i64>(sql).fetch_optional(&mut *conn).await? {
        return Ok(id);
    }

    sqlx::query(
        "INSERT INTO materializer_checkpoint (id, last_processed_id) VALUES (1, 0) ON CONFLICT (id) DO NOTHING",
    )
    .execute(&mut *conn)
    .await?;

    let id = sqlx::query_scalar::<_, i64>(sql).fetch_one(&mut *conn).await?;
    Ok(id)
}

/// Move the checkpoint to `max(current, candidate)` and return the new value
pub async fn advance(conn: &mut PgConnection, candidate: i64) -> DbResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        UPDATE materializer_checkpoint
        SET last_processed_id = GREATEST(last_processed_id, $1),
            updated_at = NOW()
        WHERE id = 1
        RETURNING last_processed_id
        "#,
    )
    .bind(candidate)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Unlocked read for status reporting
pub async fn read(pool: &PgPool) -> DbResult<Option<Checkpoint>> {
    let checkpoint = sqlx::query_as::<_, Checkpoint>(
        "SELECT last_processed_id, updated_at FROM materializer_checkpoint WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(checkpoint)
}
