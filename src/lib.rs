//! dojo - course exercise runner with progress gating
//!
//! Loads a structured course (ordered exercises with code stubs and
//! tests), runs each exercise's test suite as an external subprocess,
//! persists completion state in a per-course SQLite database, and gates
//! progression through a locked/unlocked sequence. A hint feature
//! forwards exercise context to a locally-hosted LLM endpoint.
//!
//! # Core Concepts
//!
//! - **Single-flight execution**: at most one live test subprocess per
//!   runner; new runs preempt the old one, batches reject concurrent
//!   single runs.
//! - **Derived status**: locked/available/in-progress/completed is never
//!   stored; it is recomputed from attempt records and exercise order.
//! - **Last-writer-wins records**: one attempt record per exercise,
//!   replaced on every run; a failing re-run reverts a prior completion.
//!
//! # Modules
//!
//! - [`course`] - Exercise/Language/Course types and the manifest loader
//! - [`store`] - durable attempt records and counters (SQLite)
//! - [`unlock`] - pure status derivation from records and ordering
//! - [`runner`] - single-flight external test execution
//! - [`batch`] - sequential coordinator with cancellation and progress
//! - [`hint`] - AI hint client for a local generation endpoint
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod batch;
pub mod cli;
pub mod config;
pub mod course;
pub mod hint;
pub mod runner;
pub mod store;
pub mod unlock;

// Re-export commonly used types
pub use batch::{BatchOutcome, BatchProgress, BatchReport, BatchRunner, CancelFlag};
pub use config::{Config, HintConfig, StorageConfig};
pub use course::{Course, CourseError, Exercise, Language, LanguageProfile};
pub use hint::{HintBackend, HintClient, HintError, OllamaClient, build_prompt};
pub use runner::{
    NullSink, OutputSink, RunMode, RunnerError, SPAWN_FAILURE_EXIT, StdoutSink, TestOutcome, TestRunResult, TestRunner,
};
pub use store::{AttemptRecord, HINT_COUNTER, ProgressStore, StorageError, TEST_RUN_COUNTER, sanitize_course_name};
pub use unlock::{CourseProgress, ExerciseStatus, course_progress, index_records, is_unlocked, status_of, statuses};
