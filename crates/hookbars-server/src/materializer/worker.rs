//! Materializer loop
//!
//! Drives cycles against a [`CheckpointStore`] until the cancellation token
//! fires. Shutdown is only observed between cycles: the sleeps are
//! interruptible, a cycle in flight runs to commit or rollback.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::extract::{extract, ExtractStats};
use super::store::{CheckpointStore, UnitOfWork};
use super::MaterializeError;
use crate::config::MaterializerConfig;

/// Loop state, published for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializerState {
    Idle,
    Fetching,
    Extracting,
    Persisting,
    Checkpointing,
    Error,
    Backoff,
    Stopped,
}

impl MaterializerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterializerState::Idle => "idle",
            MaterializerState::Fetching => "fetching",
            MaterializerState::Extracting => "extracting",
            MaterializerState::Persisting => "persisting",
            MaterializerState::Checkpointing => "checkpointing",
            MaterializerState::Error => "error",
            MaterializerState::Backoff => "backoff",
            MaterializerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MaterializerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one committed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub checkpoint_before: i64,
    pub checkpoint_after: i64,
    pub inserted: u64,
    /// Candidates whose dedup key was already stored
    pub duplicates: u64,
    pub stats: ExtractStats,
}

/// Totals over the lifetime of [`Materializer::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub events: u64,
    pub inserted: u64,
    pub duplicates: u64,
}

impl RunSummary {
    fn record(&mut self, report: &CycleReport) {
        self.events += report.fetched as u64;
        self.inserted += report.inserted;
        self.duplicates += report.duplicates;
    }
}

pub struct Materializer<S> {
    store: S,
    config: MaterializerConfig,
    state_tx: watch::Sender<MaterializerState>,
}

impl<S: CheckpointStore> Materializer<S> {
    pub fn new(store: S, config: MaterializerConfig) -> Self {
        let (state_tx, _) = watch::channel(MaterializerState::Idle);
        Self {
            store,
            config,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MaterializerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> MaterializerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: MaterializerState) {
        self.state_tx.send_replace(state);
    }

    /// Run a single cycle in one unit of work
    ///
    /// On error nothing from this cycle is visible and the checkpoint is
    /// where it was.
    pub async fn run_cycle(&self) -> Result<CycleReport, MaterializeError> {
        self.set_state(MaterializerState::Fetching);

        let mut unit = self.store.acquire().await.map_err(MaterializeError::Acquire)?;

        match self.cycle_in(&mut unit).await {
            Ok(report) if report.fetched == 0 => {
                if let Err(e) = unit.rollback().await {
                    tracing::debug!(error = %e, "Rollback of empty cycle failed");
                }
                Ok(report)
            },
            Ok(report) => {
                unit.commit().await.map_err(MaterializeError::Commit)?;
                Ok(report)
            },
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            },
        }
    }

    async fn cycle_in(&self, unit: &mut S::Unit) -> Result<CycleReport, MaterializeError> {
        let before = unit.checkpoint();
        let mut report = CycleReport {
            checkpoint_before: before,
            checkpoint_after: before,
            ..CycleReport::default()
        };

        let events = unit
            .fetch(before, self.config.batch_size, &self.config.route)
            .await
            .map_err(|source| MaterializeError::Fetch {
                after_id: before,
                source,
            })?;

        report.fetched = events.len();
        let Some(target) = events.iter().map(|e| e.id).max() else {
            return Ok(report);
        };

        self.set_state(MaterializerState::Extracting);
        let mut bars = Vec::new();
        for event in &events {
            let extraction = extract(event);
            report.stats.merge(&extraction.stats);
            bars.extend(extraction.bars);
        }

        self.set_state(MaterializerState::Persisting);
        for bar in &bars {
            let inserted = unit.insert_if_absent(bar).await.map_err(|source| {
                MaterializeError::Persist {
                    dedup: bar.dedup.clone(),
                    source,
                }
            })?;
            if inserted {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        self.set_state(MaterializerState::Checkpointing);
        let after = unit
            .advance(target)
            .await
            .map_err(|source| MaterializeError::Advance { target, source })?;

        if after < before {
            return Err(MaterializeError::CheckpointRegressed { before, after });
        }
        report.checkpoint_after = after;

        Ok(report)
    }

    /// Loop until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut consecutive_failures: u32 = 0;

        tracing::info!(
            route = %self.config.route,
            batch_size = self.config.batch_size,
            idle_ms = self.config.idle_interval_ms,
            "Materializer started"
        );

        while !shutdown.is_cancelled() {
            summary.cycles += 1;
            let span = tracing::info_span!("materializer_cycle", cycle = summary.cycles);

            let pause = match self.run_cycle().instrument(span).await {
                Ok(report) => {
                    consecutive_failures = 0;
                    summary.record(&report);
                    self.set_state(MaterializerState::Idle);

                    if report.fetched > 0 {
                        tracing::info!(
                            fetched = report.fetched,
                            inserted = report.inserted,
                            duplicates = report.duplicates,
                            unknown_kind = report.stats.unknown_kind,
                            invalid = report.stats.invalid,
                            malformed_payloads = report.stats.malformed_payloads,
                            checkpoint = report.checkpoint_after,
                            "Materialized batch"
                        );
                    }

                    if report.fetched >= self.config.batch_size as usize {
                        continue;
                    }
                    self.config.idle_interval()
                },
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    summary.failed_cycles += 1;
                    self.set_state(MaterializerState::Error);

                    let delay = backoff_for(&self.config, consecutive_failures);
                    if e.is_transient() {
                        tracing::warn!(
                            error = %e,
                            consecutive_failures,
                            backoff_ms = delay.as_millis() as u64,
                            "Materializer cycle failed, retrying"
                        );
                    } else {
                        tracing::error!(
                            error = %e,
                            consecutive_failures,
                            backoff_ms = delay.as_millis() as u64,
                            "Materializer cycle failed, retrying"
                        );
                    }
                    self.set_state(MaterializerState::Backoff);
                    delay
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {},
            }
        }

        self.set_state(MaterializerState::Stopped);
        tracing::info!(
            cycles = summary.cycles,
            failed_cycles = summary.failed_cycles,
            events = summary.events,
            inserted = summary.inserted,
            "Materializer stopped"
        );

        summary
    }
}

impl<S> Materializer<S>
where
    S: CheckpointStore + 'static,
    S::Unit: 'static,
{
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<RunSummary> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Error backoff after `consecutive_failures` failed cycles in a row
///
/// Doubles per failure starting from the configured backoff and is capped at
/// the configured maximum.
pub fn backoff_for(config: &MaterializerConfig, consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    config
        .error_backoff()
        .saturating_mul(factor)
        .min(config.max_error_backoff())
}
