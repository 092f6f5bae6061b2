//! Bounded execution of independent units and their tally.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::store::StageOutcome;

/// Counts of a batch of units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    /// `(unit, error)` of every failed unit.
    pub failed: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn record(&mut self, unit: &str, result: Result<StageOutcome, PipelineError>) {
        match result {
            Ok(StageOutcome::Completed) => self.completed += 1,
            Ok(StageOutcome::Skipped) => self.skipped += 1,
            Err(e) => {
                error!(unit, error = %e, "Unit failed");
                self.failed.push((unit.to_string(), e.to_string()));
            }
        }
    }

    pub fn merge(&mut self, other: BatchSummary) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn log(&self, what: &str) {
        info!(
            what,
            completed = self.completed,
            skipped = self.skipped,
            failed = self.failed.len(),
            "Batch finished"
        );
    }
}

/// Run `work` over every unit with at most `workers` in flight.
///
/// A failing or panicking unit is recorded and does not stop the others.
pub async fn run_bounded<U, F, Fut>(units: Vec<(String, U)>, workers: usize, work: F) -> BatchSummary
where
    U: Send + 'static,
    F: Fn(U) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<StageOutcome, PipelineError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for (name, unit) in units {
        let semaphore = Arc::clone(&semaphore);
        let work = work.clone();
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => work(unit).await,
                Err(e) => Err(PipelineError::Join(e.to_string())),
            };
            (name, result)
        });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, result)) => summary.record(&name, result),
            Err(e) => summary.record("worker", Err(PipelineError::Join(e.to_string()))),
        }
    }
    summary
}
