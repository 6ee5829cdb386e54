//! Checkpointed materialization of the raw event log into bars
//!
//! A cycle locks the checkpoint row, fetches the next slice of raw events
//! after it, extracts BAR elements, inserts them by dedup key and advances the
//! checkpoint to the highest fetched id, all in one transaction. Redelivery
//! after a rolled back cycle is harmless because inserts never overwrite.

pub mod extract;
pub mod postgres;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod memory;

pub use extract::{extract, Element, ElementError, ExtractStats, Extraction};
pub use postgres::PgCheckpointStore;
pub use store::{CheckpointStore, UnitOfWork};
pub use worker::{CycleReport, Materializer, MaterializerState, RunSummary};

use thiserror::Error;

use crate::db::DbError;

/// Failure of one materializer cycle; the unit of work is rolled back
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Failed to acquire checkpoint: {0}")]
    Acquire(#[source] DbError),

    #[error("Failed to fetch raw events after id {after_id}: {source}")]
    Fetch {
        after_id: i64,
        #[source]
        source: DbError,
    },

    #[error("Failed to persist bar {dedup}: {source}")]
    Persist {
        dedup: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to advance checkpoint to {target}: {source}")]
    Advance {
        target: i64,
        #[source]
        source: DbError,
    },

    #[error("Failed to commit cycle: {0}")]
    Commit(#[source] DbError),

    /// The store reported a checkpoint below the one this cycle started from
    #[error("Checkpoint moved backwards from {before} to {after}")]
    CheckpointRegressed { before: i64, after: i64 },
}

impl MaterializeError {
    /// Whether the store error underneath is expected to clear on retry
    pub fn is_transient(&self) -> bool {
        match self {
            MaterializeError::Acquire(e)
            | MaterializeError::Commit(e)
            | MaterializeError::Fetch { source: e, .. }
            | MaterializeError::Persist { source: e, .. }
            | MaterializeError::Advance { source: e, .. } => e.is_transient(),
            MaterializeError::CheckpointRegressed { .. } => false,
        }
    }
}
