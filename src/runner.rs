//! TestRunner - single-flight external test execution
//!
//! Runs one test-runner subprocess per exercise with the course root as
//! working directory, streams the combined output, classifies the exit
//! into Passed/Failed/Error, and applies the store post-conditions.
//!
//! The runner owns at most one live subprocess at a time: launching a new
//! run first terminates any subprocess it currently owns, and a batch in
//! flight causes direct single runs to be rejected rather than queued.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::course::{Exercise, Language};
use crate::store::{ProgressStore, StorageError, TEST_RUN_COUNTER};

/// Exit code recorded when the subprocess never produced one
/// (spawn failure, kill, or termination by signal)
pub const SPAWN_FAILURE_EXIT: i32 = -1;

/// Tri-state classification of one test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    /// Exit code 0
    Passed,
    /// Any other exit code
    Failed,
    /// Subprocess failed to spawn, errored before exit, or was cancelled
    Error,
}

/// Transient value produced by one executor invocation; never persisted
#[derive(Debug, Clone)]
pub struct TestRunResult {
    pub outcome: TestOutcome,
    /// Combined stdout/stderr transcript in arrival order
    pub output: String,
    pub exit_code: i32,
}

/// Whether live output is surfaced while the test runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No live output; used by batch runs
    Silent,
    /// Output chunks are forwarded to the sink as they arrive
    Interactive,
}

/// Consumer of live test output
pub trait OutputSink: Send + Sync {
    fn write(&self, chunk: &str);
}

/// Sink that prints chunks to stdout as they arrive
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&self, chunk: &str) {
        print!("{chunk}");
    }
}

/// Sink that discards everything
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&self, _chunk: &str) {}
}

/// Errors raised by the runner outside of test failure
///
/// A failing test is not an error: it is the expected `Failed`
/// classification. Only precondition violations, batch contention, and
/// storage faults propagate here.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid exercise: {0}")]
    InvalidExercise(String),

    #[error("a batch run is in progress")]
    BatchInProgress,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Resolved command for one test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TestCommand {
    #[cfg(test)]
    pub(crate) fn shell(script: &str) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }
}

/// Handle to the live subprocess of one run
struct LiveRun {
    generation: u64,
    kill_tx: oneshot::Sender<()>,
    done_rx: oneshot::Receiver<()>,
}

/// Single-flight test executor for one course workspace
pub struct TestRunner {
    workspace: PathBuf,
    store: ProgressStore,
    sink: Arc<dyn OutputSink>,
    live: Mutex<Option<LiveRun>>,
    batch_active: AtomicBool,
    generation: AtomicU64,
}

impl TestRunner {
    pub fn new(workspace: PathBuf, store: ProgressStore, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            workspace,
            store,
            sink,
            live: Mutex::new(None),
            batch_active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Run the tests for one exercise and apply the store post-conditions
    ///
    /// Rejected with [`RunnerError::BatchInProgress`] while a batch run
    /// holds the executor. The flag is checked again under the live-run
    /// lock inside [`Self::launch`], so a run admitted here can still be
    /// turned away if a batch claims the slot before it reaches the
    /// subprocess; a direct run never preempts a batch-owned subprocess.
    pub async fn run(&self, exercise: &Exercise, language: Language, mode: RunMode) -> Result<TestRunResult, RunnerError> {
        if self.batch_active.load(Ordering::SeqCst) {
            return Err(RunnerError::BatchInProgress);
        }
        self.run_inner(exercise, language, mode, true).await
    }

    /// Run without the batch-contention check; used by the batch runner,
    /// which already holds the batch slot
    pub(crate) async fn run_unchecked(
        &self,
        exercise: &Exercise,
        language: Language,
        mode: RunMode,
    ) -> Result<TestRunResult, RunnerError> {
        self.run_inner(exercise, language, mode, false).await
    }

    async fn run_inner(
        &self,
        exercise: &Exercise,
        language: Language,
        mode: RunMode,
        direct: bool,
    ) -> Result<TestRunResult, RunnerError> {
        validate(exercise)?;
        let command = build_command(language, exercise, &self.workspace);

        info!(
            exercise = %exercise.id,
            %language,
            program = %command.program,
            "running exercise tests"
        );

        let result = self.launch(command, mode, direct).await?;

        debug!(
            exercise = %exercise.id,
            outcome = ?result.outcome,
            exit_code = result.exit_code,
            "test run finished"
        );

        self.record(&exercise.id, &result).await?;
        Ok(result)
    }

    /// Kill the live subprocess, if any
    ///
    /// The pending run resolves as `Error` rather than hanging. Safe to
    /// call repeatedly or after completion.
    pub async fn cancel(&self) {
        let mut slot = self.live.lock().await;
        if let Some(live) = slot.take() {
            debug!("cancelling live test run");
            let _ = live.kill_tx.send(());
        }
    }

    /// Claim the batch slot; dropped guard releases it
    pub(crate) fn begin_batch(self: &Arc<Self>) -> Result<BatchGuard, RunnerError> {
        if self
            .batch_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunnerError::BatchInProgress);
        }
        Ok(BatchGuard {
            runner: Arc::clone(self),
        })
    }

    /// Terminate any live subprocess, then spawn and supervise the command
    ///
    /// `direct` marks a single run admitted outside a batch; it is
    /// re-checked against the batch flag under the slot lock so that a
    /// batch claiming the runner between admission and launch wins.
    async fn launch(&self, command: TestCommand, mode: RunMode, direct: bool) -> Result<TestRunResult, RunnerError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        // Preempt the previous run before starting ours. Awaiting its done
        // signal guarantees its subprocess is gone before we spawn.
        let previous = {
            let mut slot = self.live.lock().await;
            if direct && self.batch_active.load(Ordering::SeqCst) {
                return Err(RunnerError::BatchInProgress);
            }
            slot.take()
        };
        if let Some(prev) = previous {
            warn!("terminating previous test subprocess before starting a new run");
            let _ = prev.kill_tx.send(());
            let _ = prev.done_rx.await;
        }

        {
            let mut slot = self.live.lock().await;
            *slot = Some(LiveRun {
                generation,
                kill_tx,
                done_rx,
            });
        }

        let result = self.execute(&command, mode, kill_rx).await;

        {
            let mut slot = self.live.lock().await;
            if slot.as_ref().map(|l| l.generation) == Some(generation) {
                slot.take();
            }
        }
        let _ = done_tx.send(());

        Ok(result)
    }

    /// Spawn the subprocess and stream its output until exit or kill
    async fn execute(&self, command: &TestCommand, mode: RunMode, mut kill_rx: oneshot::Receiver<()>) -> TestRunResult {
        let mut child = match tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&self.workspace)
            .env("NO_COLOR", "1")
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %command.program, error = %e, "failed to spawn test runner");
                return TestRunResult {
                    outcome: TestOutcome::Error,
                    output: format!("failed to spawn {}: {}\n", command.program, e),
                    exit_code: SPAWN_FAILURE_EXIT,
                };
            }
        };

        // Funnel stdout and stderr through one channel so the transcript
        // preserves arrival order between the two streams.
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            let tx = chunk_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line + "\n").is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = chunk_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line + "\n").is_err() {
                        break;
                    }
                }
            });
        }
        drop(chunk_tx);

        let mut transcript = String::new();
        let status = loop {
            tokio::select! {
                chunk = chunk_rx.recv() => match chunk {
                    Some(chunk) => {
                        if mode == RunMode::Interactive {
                            self.sink.write(&chunk);
                        }
                        transcript.push_str(&chunk);
                    }
                    // Both pipes closed; the process is exiting
                    None => break tokio::select! {
                        status = child.wait() => status.ok(),
                        _ = &mut kill_rx => None,
                    },
                },
                _ = &mut kill_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    while let Some(chunk) = chunk_rx.recv().await {
                        transcript.push_str(&chunk);
                    }
                    transcript.push_str("[test run cancelled]\n");
                    return TestRunResult {
                        outcome: TestOutcome::Error,
                        output: transcript,
                        exit_code: SPAWN_FAILURE_EXIT,
                    };
                }
            }
        };

        match status {
            Some(status) => {
                let exit_code = status.code().unwrap_or(SPAWN_FAILURE_EXIT);
                let outcome = if status.success() {
                    TestOutcome::Passed
                } else {
                    TestOutcome::Failed
                };
                TestRunResult {
                    outcome,
                    output: transcript,
                    exit_code,
                }
            }
            None => TestRunResult {
                outcome: TestOutcome::Error,
                output: transcript,
                exit_code: SPAWN_FAILURE_EXIT,
            },
        }
    }

    /// Apply the post-conditions for a classified result
    ///
    /// Passed marks the exercise completed, Failed overwrites any prior
    /// completion as not-completed, Error writes nothing. The test-run
    /// counter increments on Passed and Failed only.
    async fn record(&self, exercise_id: &str, result: &TestRunResult) -> Result<(), StorageError> {
        match result.outcome {
            TestOutcome::Passed => {
                self.store.mark_completed(exercise_id).await?;
                self.store.increment_counter(TEST_RUN_COUNTER).await?;
            }
            TestOutcome::Failed => {
                self.store.mark_attempted(exercise_id).await?;
                self.store.increment_counter(TEST_RUN_COUNTER).await?;
            }
            TestOutcome::Error => {}
        }
        Ok(())
    }
}

/// Claim on the runner's batch slot; releases it on drop
pub(crate) struct BatchGuard {
    runner: Arc<TestRunner>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.runner.batch_active.store(false, Ordering::SeqCst);
    }
}

fn validate(exercise: &Exercise) -> Result<(), RunnerError> {
    if exercise.id.trim().is_empty() {
        return Err(RunnerError::InvalidExercise("empty exercise id".to_string()));
    }
    if exercise.title.trim().is_empty() {
        return Err(RunnerError::InvalidExercise(format!(
            "exercise '{}' has no title",
            exercise.id
        )));
    }
    if exercise.test_path.as_os_str().is_empty() {
        return Err(RunnerError::InvalidExercise(format!(
            "exercise '{}' has no test file path",
            exercise.id
        )));
    }
    Ok(())
}

/// Resolve the language command template for one exercise
///
/// Substitutes the workspace-relative test path (or the exercise id, for
/// named-test runners) into the fixed per-language profile.
fn build_command(language: Language, exercise: &Exercise, workspace: &Path) -> TestCommand {
    let profile = language.profile();
    let relative = exercise
        .test_path
        .strip_prefix(workspace)
        .unwrap_or(&exercise.test_path);

    let mut args: Vec<String> = profile.base_args.iter().map(|s| s.to_string()).collect();
    match language {
        Language::Javascript => {
            args.push(relative.display().to_string());
            args.push("--colors=false".to_string());
        }
        Language::Python => {
            args.push(relative.display().to_string());
        }
        Language::Go => {
            let dir = relative.parent().unwrap_or_else(|| Path::new("."));
            args.push(format!("./{}/", dir.display()));
        }
        Language::Rust => {
            args.push(exercise.id.clone());
            args.push("--".to_string());
        }
    }

    TestCommand {
        program: profile.program.to_string(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::tempdir;

    struct CollectSink(StdMutex<String>);

    impl CollectSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(StdMutex::new(String::new())))
        }

        fn contents(&self) -> String {
            self.0.lock().unwrap().clone()
        }
    }

    impl OutputSink for CollectSink {
        fn write(&self, chunk: &str) {
            self.0.lock().unwrap().push_str(chunk);
        }
    }

    fn exercise(id: &str) -> Exercise {
        Exercise {
            id: id.to_string(),
            title: format!("Exercise {id}"),
            description: String::new(),
            order: 0,
            source_path: PathBuf::from(format!("exercises/{id}/{id}.py")),
            test_path: PathBuf::from(format!("exercises/{id}/test_{id}.py")),
            readme_path: PathBuf::from(format!("exercises/{id}/README.md")),
        }
    }

    async fn runner(dir: &tempfile::TempDir) -> Arc<TestRunner> {
        let store = ProgressStore::open(&dir.path().join("progress.db")).await.unwrap();
        Arc::new(TestRunner::new(dir.path().to_path_buf(), store, Arc::new(NullSink)))
    }

    async fn runner_with_sink(dir: &tempfile::TempDir, sink: Arc<dyn OutputSink>) -> Arc<TestRunner> {
        let store = ProgressStore::open(&dir.path().join("progress.db")).await.unwrap();
        Arc::new(TestRunner::new(dir.path().to_path_buf(), store, sink))
    }

    #[tokio::test]
    async fn test_exit_zero_classifies_passed() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let result = runner.launch(TestCommand::shell("echo OK"), RunMode::Silent, false).await.unwrap();

        assert_eq!(result.outcome, TestOutcome::Passed);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("OK"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_classifies_failed() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let result = runner
            .launch(TestCommand::shell("echo boom >&2; exit 3"), RunMode::Silent, false)
            .await
            .unwrap();

        assert_eq!(result.outcome, TestOutcome::Failed);
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_spawn_failure_classifies_error() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let command = TestCommand {
            program: "/nonexistent/test-runner".to_string(),
            args: vec![],
        };
        let result = runner.launch(command, RunMode::Silent, false).await.unwrap();

        assert_eq!(result.outcome, TestOutcome::Error);
        assert_eq!(result.exit_code, SPAWN_FAILURE_EXIT);
        assert!(result.output.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_interactive_mode_streams_to_sink() {
        let temp = tempdir().unwrap();
        let sink = CollectSink::new();
        let runner = runner_with_sink(&temp, sink.clone()).await;

        let result = runner
            .launch(TestCommand::shell("echo one; echo two >&2"), RunMode::Interactive, false)
            .await
            .unwrap();

        assert_eq!(result.outcome, TestOutcome::Passed);
        let streamed = sink.contents();
        assert!(streamed.contains("one"));
        assert!(streamed.contains("two"));
    }

    #[tokio::test]
    async fn test_silent_mode_skips_sink() {
        let temp = tempdir().unwrap();
        let sink = CollectSink::new();
        let runner = runner_with_sink(&temp, sink.clone()).await;

        let result = runner.launch(TestCommand::shell("echo quiet"), RunMode::Silent, false).await.unwrap();

        assert!(result.output.contains("quiet"));
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_preempts_previous_run() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let first = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.launch(TestCommand::shell("sleep 30"), RunMode::Silent, false).await.unwrap() })
        };
        // Let the first subprocess spawn
        tokio::time::sleep(Duration::from_millis(200)).await;

        let second = runner.launch(TestCommand::shell("echo fresh"), RunMode::Silent, false).await.unwrap();
        assert_eq!(second.outcome, TestOutcome::Passed);

        let first = first.await.unwrap();
        assert_eq!(first.outcome, TestOutcome::Error);
        assert_eq!(first.exit_code, SPAWN_FAILURE_EXIT);
    }

    #[tokio::test]
    async fn test_cancel_resolves_pending_result() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let pending = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.launch(TestCommand::shell("sleep 30"), RunMode::Silent, false).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        runner.cancel().await;
        // Cancelling again (and after completion) is a no-op
        runner.cancel().await;

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("cancelled run must resolve")
            .unwrap();
        assert_eq!(result.outcome, TestOutcome::Error);
        assert!(result.output.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_exercise_without_side_effects() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let mut bad = exercise("ex");
        bad.id = String::new();

        let err = runner.run(&bad, Language::Python, RunMode::Silent).await.unwrap_err();
        assert!(matches!(err, RunnerError::InvalidExercise(_)));
        assert_eq!(runner.store.counter(TEST_RUN_COUNTER).await.unwrap(), 0);
        assert!(runner.store.attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_rejected_while_batch_active() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let guard = runner.begin_batch().unwrap();
        let err = runner
            .run(&exercise("ex"), Language::Python, RunMode::Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::BatchInProgress));

        // Second batch claim is also rejected while the first is held
        assert!(matches!(runner.begin_batch(), Err(RunnerError::BatchInProgress)));

        drop(guard);
        assert!(runner.begin_batch().is_ok());
    }

    #[tokio::test]
    async fn test_direct_launch_rechecks_batch_flag_under_slot_lock() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        // A direct run that passed admission before the batch claimed the
        // slot is still turned away at the subprocess boundary and never
        // preempts the batch's live run.
        let guard = runner.begin_batch().unwrap();
        let err = runner
            .launch(TestCommand::shell("echo hi"), RunMode::Silent, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::BatchInProgress));

        // The batch's own launches are unaffected by the held slot
        let result = runner
            .launch(TestCommand::shell("echo hi"), RunMode::Silent, false)
            .await
            .unwrap();
        assert_eq!(result.outcome, TestOutcome::Passed);
        drop(guard);
    }

    #[tokio::test]
    async fn test_record_passed_marks_completed_and_counts() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let result = TestRunResult {
            outcome: TestOutcome::Passed,
            output: String::new(),
            exit_code: 0,
        };
        runner.record("ex", &result).await.unwrap();

        assert!(runner.store.attempt("ex").await.unwrap().unwrap().completed);
        assert_eq!(runner.store.counter(TEST_RUN_COUNTER).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_failed_reverts_completion() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        runner.store.mark_completed("ex").await.unwrap();
        let result = TestRunResult {
            outcome: TestOutcome::Failed,
            output: String::new(),
            exit_code: 1,
        };
        runner.record("ex", &result).await.unwrap();

        let record = runner.store.attempt("ex").await.unwrap().unwrap();
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn test_record_error_writes_nothing() {
        let temp = tempdir().unwrap();
        let runner = runner(&temp).await;

        let result = TestRunResult {
            outcome: TestOutcome::Error,
            output: String::new(),
            exit_code: SPAWN_FAILURE_EXIT,
        };
        runner.record("ex", &result).await.unwrap();

        assert_eq!(runner.store.attempt("ex").await.unwrap(), None);
        assert_eq!(runner.store.counter(TEST_RUN_COUNTER).await.unwrap(), 0);
    }

    #[test]
    fn test_build_command_per_language() {
        let workspace = Path::new("/course");
        let mut ex = exercise("sum");
        ex.test_path = PathBuf::from("/course/exercises/sum/test_sum.py");

        let cmd = build_command(Language::Python, &ex, workspace);
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["-m", "pytest", "exercises/sum/test_sum.py"]);

        ex.test_path = PathBuf::from("/course/exercises/sum/sum.test.js");
        let cmd = build_command(Language::Javascript, &ex, workspace);
        assert_eq!(cmd.program, "npx");
        assert_eq!(cmd.args, vec!["jest", "exercises/sum/sum.test.js", "--colors=false"]);

        ex.test_path = PathBuf::from("/course/exercises/sum/sum_test.go");
        let cmd = build_command(Language::Go, &ex, workspace);
        assert_eq!(cmd.program, "go");
        assert_eq!(cmd.args, vec!["test", "./exercises/sum/"]);

        ex.test_path = PathBuf::from("/course/exercises/sum/sum_test.rs");
        let cmd = build_command(Language::Rust, &ex, workspace);
        assert_eq!(cmd.program, "cargo");
        assert_eq!(cmd.args, vec!["test", "sum", "--"]);
    }
}
