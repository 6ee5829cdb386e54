//! In-memory checkpoint store with fault injection, for tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{CheckpointStore, UnitOfWork};
use crate::db::{DbError, DbResult};
use crate::models::{NewBar, RawEvent};

#[derive(Debug, Default)]
struct State {
    events: Vec<RawEvent>,
    bars: BTreeMap<String, NewBar>,
    checkpoint: i64,
}

/// Number of upcoming calls that fail, per operation
#[derive(Debug, Default)]
pub struct Faults {
    pub acquire: AtomicU32,
    pub fetch: AtomicU32,
    pub insert: AtomicU32,
    pub advance: AtomicU32,
    pub commit: AtomicU32,
}

fn trip(counter: &AtomicU32, op: &str) -> DbResult<()> {
    let hit = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if hit {
        Err(DbError::Timeout(format!("injected {} failure", op)))
    } else {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    pub faults: Arc<Faults>,
    acquisitions: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event with the next id
    pub async fn push_event(&self, route: &str, payload: serde_json::Value) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.events.last().map_or(1, |e| e.id + 1);
        state.events.push(RawEvent {
            id,
            received_at: chrono::Utc::now(),
            route: route.to_string(),
            payload,
        });
        id
    }

    /// Append an event with a fixed id; ids must keep increasing
    pub async fn push_event_with_id(&self, id: i64, route: &str, payload: serde_json::Value) {
        let mut state = self.state.lock().await;
        assert!(state.events.last().map_or(true, |e| e.id < id));
        state.events.push(RawEvent {
            id,
            received_at: chrono::Utc::now(),
            route: route.to_string(),
            payload,
        });
    }

    pub async fn checkpoint(&self) -> i64 {
        self.state.lock().await.checkpoint
    }

    /// Overwrite the checkpoint, e.g. to replay a range
    pub async fn set_checkpoint(&self, id: i64) {
        self.state.lock().await.checkpoint = id;
    }

    pub async fn bars(&self) -> Vec<NewBar> {
        self.state.lock().await.bars.values().cloned().collect()
    }

    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl Faults {
    /// Make the next `times` calls guarded by `counter` fail
    pub fn arm(counter: &AtomicU32, times: u32) {
        counter.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn acquire(&self) -> DbResult<MemoryUnit> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        trip(&self.faults.acquire, "acquire")?;

        let guard = self.state.clone().lock_owned().await;
        let checkpoint = guard.checkpoint;
        Ok(MemoryUnit {
            guard,
            faults: self.faults.clone(),
            staged: Vec::new(),
            checkpoint,
        })
    }
}

/// Holds the store lock; staged writes apply on commit only
pub struct MemoryUnit {
    guard: OwnedMutexGuard<State>,
    faults: Arc<Faults>,
    staged: Vec<NewBar>,
    checkpoint: i64,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn checkpoint(&self) -> i64 {
        self.checkpoint
    }

    async fn fetch(&mut self, after_id: i64, limit: u32, route: &str) -> DbResult<Vec<RawEvent>> {
        trip(&self.faults.fetch, "fetch")?;
        Ok(self
            .guard
            .events
            .iter()
            .filter(|e| e.id > after_id && e.route == route)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_if_absent(&mut self, bar: &NewBar) -> DbResult<bool> {
        trip(&self.faults.insert, "insert")?;
        let exists = self.guard.bars.contains_key(&bar.dedup)
            || self.staged.iter().any(|b| b.dedup == bar.dedup);
        if exists {
            return Ok(false);
        }
        self.staged.push(bar.clone());
        Ok(true)
    }

    async fn advance(&mut self, candidate: i64) -> DbResult<i64> {
        trip(&self.faults.advance, "advance")?;
        self.checkpoint = self.checkpoint.max(candidate);
        Ok(self.checkpoint)
    }

    async fn commit(mut self) -> DbResult<()> {
        trip(&self.faults.commit, "commit")?;
        for bar in self.staged.drain(..) {
            self.guard.bars.insert(bar.dedup.clone(), bar);
        }
        self.guard.checkpoint = self.checkpoint;
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        Ok(())
    }
}
