//! BatchRunner - sequential test runs across a whole course
//!
//! Drives the TestRunner over an ordered exercise list in silent mode,
//! records a per-exercise outcome map, emits incremental progress
//! snapshots, and stops early on cooperative cancellation. While a batch
//! holds the runner, direct single-exercise runs are rejected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::course::{Exercise, Language};
use crate::runner::{RunMode, RunnerError, TestOutcome, TestRunner};

/// Cooperative cancellation flag, checked between exercises
///
/// Cloneable; setting it is idempotent and safe after completion.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Incremental snapshot for a consumer to render
///
/// Emitted once before the batch starts, once at the start of each
/// iteration, and once at the end (with `current` absent). A snapshot
/// naming a `current` exercise precedes that exercise's run, so its
/// counts (`completed`, `passed`, `failed`) never include `current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    /// Exercises attempted so far
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    /// Identifier of the exercise currently running
    pub current: Option<String>,
}

/// Aggregate results of one batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Classified result per exercise id
    pub results: HashMap<String, TestOutcome>,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl BatchReport {
    fn record(&mut self, id: &str, outcome: TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Error => self.errored += 1,
        }
        self.results.insert(id.to_string(), outcome);
    }

    pub fn attempted(&self) -> usize {
        self.results.len()
    }
}

/// Terminal state of a batch run, reported distinctly to the consumer
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// Every exercise was attempted
    Completed(BatchReport),
    /// The loop exited early on user cancellation; results recorded up to
    /// that point are kept
    Cancelled(BatchReport),
}

impl BatchOutcome {
    pub fn report(&self) -> &BatchReport {
        match self {
            BatchOutcome::Completed(report) | BatchOutcome::Cancelled(report) => report,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self, BatchOutcome::Cancelled(_))
    }
}

/// Sequential coordinator over one shared TestRunner
pub struct BatchRunner {
    runner: Arc<TestRunner>,
}

impl BatchRunner {
    pub fn new(runner: Arc<TestRunner>) -> Self {
        Self { runner }
    }

    /// Run every exercise in order, funneling through the runner's
    /// single-flight subprocess slot
    ///
    /// Fails only if another batch already holds the runner. Per-exercise
    /// faults are recorded as `Error` and never abort the remaining run.
    pub async fn run_all(
        &self,
        exercises: &[Exercise],
        language: Language,
        cancel: &CancelFlag,
        progress_tx: &mpsc::UnboundedSender<BatchProgress>,
    ) -> Result<BatchOutcome, RunnerError> {
        let _guard = self.runner.begin_batch()?;

        let total = exercises.len();
        let mut report = BatchReport::default();

        info!(total, %language, "starting batch run");
        emit(progress_tx, &report, total, None);

        for exercise in exercises {
            if cancel.is_cancelled() {
                info!(attempted = report.attempted(), total, "batch cancelled");
                emit(progress_tx, &report, total, None);
                return Ok(BatchOutcome::Cancelled(report));
            }

            emit(progress_tx, &report, total, Some(exercise.id.clone()));

            let outcome = match self
                .runner
                .run_unchecked(exercise, language, RunMode::Silent)
                .await
            {
                Ok(result) => result.outcome,
                Err(e) => {
                    // Isolate per-exercise faults; the batch carries on
                    warn!(exercise = %exercise.id, error = %e, "exercise run errored");
                    TestOutcome::Error
                }
            };
            report.record(&exercise.id, outcome);

            // Let snapshot consumers react before the next flag check,
            // even when an iteration resolves without suspending
            tokio::task::yield_now().await;
        }

        info!(
            passed = report.passed,
            failed = report.failed,
            errored = report.errored,
            total,
            "batch run complete"
        );
        emit(progress_tx, &report, total, None);
        Ok(BatchOutcome::Completed(report))
    }
}

fn emit(tx: &mpsc::UnboundedSender<BatchProgress>, report: &BatchReport, total: usize, current: Option<String>) {
    // The consumer may have gone away; progress is best-effort
    let _ = tx.send(BatchProgress {
        total,
        completed: report.attempted(),
        passed: report.passed,
        failed: report.failed,
        current,
    });
}
