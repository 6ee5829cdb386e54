//! Postgres implementation of the materializer store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use super::store::{CheckpointStore, UnitOfWork};
use crate::config::{Config, LockMode};
use crate::db::{self, DbResult};
use crate::models::{NewBar, RawEvent};

/// Settings applied to every unit of work
#[derive(Debug, Clone, Copy)]
pub struct UnitSettings {
    pub lock_mode: LockMode,
    pub lock_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
    settings: UnitSettings,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool, settings: UnitSettings) -> Self {
        Self { pool, settings }
    }

    pub fn from_config(pool: PgPool, config: &Config) -> Self {
        Self::new(
            pool,
            UnitSettings {
                lock_mode: config.materializer.lock_mode,
                lock_timeout: config.database.lock_timeout(),
                statement_timeout: config.database.statement_timeout(),
            },
        )
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    type Unit = PgUnitOfWork;

    async fn acquire(&self) -> DbResult<PgUnitOfWork> {
        let mut tx = self.pool.begin().await?;

        db::set_local_timeouts(
            &mut tx,
            self.settings.lock_timeout,
            self.settings.statement_timeout,
        )
        .await?;

        // Dropping `tx` on error rolls it back.
        let checkpoint = db::checkpoint::lock(&mut tx, self.settings.lock_mode).await?;

        Ok(PgUnitOfWork { tx, checkpoint })
    }
}

/// One open transaction holding the checkpoint row lock
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    checkpoint: i64,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn checkpoint(&self) -> i64 {
        self.checkpoint
    }

    async fn fetch(&mut self, after_id: i64, limit: u32, route: &str) -> DbResult<Vec<RawEvent>> {
        db::raw_events::fetch_after(&mut self.tx, after_id, i64::from(limit), route).await
    }

    async fn insert_if_absent(&mut self, bar: &NewBar) -> DbResult<bool> {
        db::bars::insert_if_absent(&mut self.tx, bar).await
    }

    async fn advance(&mut self, candidate: i64) -> DbResult<i64> {
        let id = db::checkpoint::advance(&mut self.tx, candidate).await?;
        self.checkpoint = id;
        Ok(id)
    }

    async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
