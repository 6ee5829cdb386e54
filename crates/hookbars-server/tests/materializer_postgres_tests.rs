//! Materializer against a real Postgres: locking, replay and append ordering

mod common;

use common::{TestPostgres, ROUTE};
use hookbars_server::config::LockMode;
use hookbars_server::db::{self, DbError};
use hookbars_server::materializer::MaterializeError;
use serde_json::json;
use serial_test::serial;

fn scenario_payload() -> serde_json::Value {
    json!({"records": [
        {"kind": "BAR", "dedup": "BAR|X|15|100", "symbol": "X", "tf_sec": 15, "close": 101.5},
        {"kind": "OTHER"}
    ]})
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_event_42_materializes_one_bar() {
    let pg = TestPostgres::start().await.unwrap();
    pg.insert_event(42, scenario_payload()).await.unwrap();

    let report = pg.materializer(LockMode::Wait).run_cycle().await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.stats.unknown_kind, 1);
    assert_eq!(pg.checkpoint().await.unwrap(), 42);

    let (dedup, raw_event_id, close): (String, i64, Option<f64>) =
        sqlx::query_as("SELECT dedup, raw_event_id, close FROM bars")
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(dedup, "BAR|X|15|100");
    assert_eq!(raw_event_id, 42);
    assert_eq!(close, Some(101.5));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_replayed_event_does_not_duplicate() {
    let pg = TestPostgres::start().await.unwrap();
    pg.insert_event(42, scenario_payload()).await.unwrap();
    let materializer = pg.materializer(LockMode::Wait);

    materializer.run_cycle().await.unwrap();
    pg.reset_checkpoint().await.unwrap();
    let replay = materializer.run_cycle().await.unwrap();

    assert_eq!(replay.inserted, 0);
    assert_eq!(replay.duplicates, 1);
    assert_eq!(pg.bar_count().await.unwrap(), 1);
    assert_eq!(pg.checkpoint().await.unwrap(), 42);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_malformed_element_is_skipped() {
    let pg = TestPostgres::start().await.unwrap();
    pg.insert_event(
        5,
        json!({"records": [
            {"kind": "BAR", "symbol": "A", "tf_sec": 60, "open": "1.5"},
            {"kind": "BAR", "symbol": "", "tf_sec": 60},
            {"kind": "BAR", "symbol": "B", "tf_sec": 60, "time": "2026-01-01T00:00:00Z"}
        ]}),
    )
    .await
    .unwrap();

    let report = pg.materializer(LockMode::Wait).run_cycle().await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.stats.invalid, 1);
    assert_eq!(pg.checkpoint().await.unwrap(), 5);

    let keys: Vec<String> = sqlx::query_scalar("SELECT dedup FROM bars ORDER BY dedup")
        .fetch_all(pg.pool())
        .await
        .unwrap();
    assert_eq!(keys, vec!["raw:5:0", "raw:5:2"]);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_held_lock_blocks_second_worker() {
    let pg = TestPostgres::start().await.unwrap();
    pg.insert_event(1, json!([{"kind": "BAR", "symbol": "A", "tf_sec": 60}]))
        .await
        .unwrap();

    let mut holder = pg.pool().begin().await.unwrap();
    db::checkpoint::lock(&mut holder, LockMode::Wait).await.unwrap();

    let nowait = pg.materializer(LockMode::NoWait).run_cycle().await;
    assert!(matches!(nowait, Err(MaterializeError::Acquire(DbError::LockUnavailable))));

    // Bounded by the 500 ms lock timeout
    let wait = pg.materializer(LockMode::Wait).run_cycle().await.unwrap_err();
    assert!(wait.is_transient(), "{}", wait);

    holder.rollback().await.unwrap();
    assert_eq!(pg.checkpoint().await.unwrap(), 0);
    assert_eq!(pg.bar_count().await.unwrap(), 0);

    let report = pg.materializer(LockMode::NoWait).run_cycle().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(pg.checkpoint().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_checkpoint_advance_never_decreases() {
    let pg = TestPostgres::start().await.unwrap();

    let mut tx = pg.pool().begin().await.unwrap();
    assert_eq!(db::checkpoint::lock(&mut tx, LockMode::Wait).await.unwrap(), 0);
    assert_eq!(db::checkpoint::advance(&mut tx, 10).await.unwrap(), 10);
    assert_eq!(db::checkpoint::advance(&mut tx, 3).await.unwrap(), 10);
    tx.commit().await.unwrap();

    assert_eq!(pg.checkpoint().await.unwrap(), 10);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_missing_checkpoint_row_is_recreated() {
    let pg = TestPostgres::start().await.unwrap();
    sqlx::query("DELETE FROM materializer_checkpoint")
        .execute(pg.pool())
        .await
        .unwrap();
    pg.insert_event(7, json!([{"kind": "BAR", "symbol": "A", "tf_sec": 60}]))
        .await
        .unwrap();

    let report = pg.materializer(LockMode::Wait).run_cycle().await.unwrap();

    assert_eq!(report.checkpoint_before, 0);
    let read = db::checkpoint::read(pg.pool()).await.unwrap().unwrap();
    assert_eq!(read.last_processed_id, 7);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_concurrent_appends_are_ordered() {
    let pg = TestPostgres::start().await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let pool = pg.pool().clone();
            tokio::spawn(async move {
                db::raw_events::append(&pool, ROUTE, &json!({"n": i})).await.unwrap().id
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20);

    let mut conn = pg.pool().acquire().await.unwrap();
    let fetched = db::raw_events::fetch_after(&mut conn, 0, 100, ROUTE).await.unwrap();
    let fetched_ids: Vec<i64> = fetched.iter().map(|e| e.id).collect();
    assert_eq!(fetched_ids, ids);

    assert_eq!(db::raw_events::latest_id(pg.pool(), ROUTE).await.unwrap(), ids.last().copied());
    assert_eq!(db::raw_events::count_after(pg.pool(), ids[9], ROUTE).await.unwrap(), 10);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_loop_drains_backlog_and_stops() {
    let pg = TestPostgres::start().await.unwrap();
    for id in 1..=3 {
        pg.insert_event(id, json!([{"kind": "BAR", "symbol": "A", "tf_sec": 60, "close": id}]))
            .await
            .unwrap();
    }

    let token = tokio_util::sync::CancellationToken::new();
    let handle = pg.materializer(LockMode::Wait).spawn(token.clone());

    for _ in 0..50 {
        if pg.checkpoint().await.unwrap() == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    token.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(summary.inserted, 3);
    assert_eq!(pg.bar_count().await.unwrap(), 3);
}
