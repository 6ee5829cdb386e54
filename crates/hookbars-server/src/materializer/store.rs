//! Store seam for the materializer
//!
//! [`CheckpointStore::acquire`] opens a unit of work that already holds the
//! checkpoint lock. Everything the cycle does goes through that unit and only
//! becomes visible on [`UnitOfWork::commit`]; dropping the unit without
//! committing discards it.

use async_trait::async_trait;

use crate::db::DbResult;
use crate::models::{NewBar, RawEvent};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    type Unit: UnitOfWork;

    /// Open a unit of work holding the exclusive checkpoint lock
    async fn acquire(&self) -> DbResult<Self::Unit>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// `last_processed_id` as read under the lock
    fn checkpoint(&self) -> i64;

    /// Raw events on `route` with `id > after_id`, ascending, at most `limit`
    async fn fetch(&mut self, after_id: i64, limit: u32, route: &str) -> DbResult<Vec<RawEvent>>;

    /// Insert unless the dedup key exists; `true` when a row was written
    async fn insert_if_absent(&mut self, bar: &NewBar) -> DbResult<bool>;

    /// Set the checkpoint to `max(current, candidate)` and return it
    async fn advance(&mut self, candidate: i64) -> DbResult<i64>;

    async fn commit(self) -> DbResult<()>;

    async fn rollback(self) -> DbResult<()>;
}
