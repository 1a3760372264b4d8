//! dojo - course exercise runner
//!
//! CLI entry point: loads the course, opens the per-course progress
//! store, and dispatches commands against the execution core.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::sync::mpsc;
use tracing::info;

use dojo::batch::{BatchOutcome, BatchProgress, BatchRunner, CancelFlag};
use dojo::cli::{Cli, Command};
use dojo::config::Config;
use dojo::course::Course;
use dojo::hint::HintClient;
use dojo::runner::{RunMode, StdoutSink, TestOutcome, TestRunner};
use dojo::store::{AttemptRecord, HINT_COUNTER, ProgressStore, TEST_RUN_COUNTER};
use dojo::unlock::{self, ExerciseStatus};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dojo")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Log to file, keeping stdout for test output and status rendering
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("dojo.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let course = Course::load(&cli.course).context("Failed to load course")?;

    let store = ProgressStore::for_course(&config.storage.data_dir, &course.name)
        .await
        .context("Failed to open progress store")?;
    store.set_meta("name", &course.name).await?;
    store.set_meta("language", course.language.as_str()).await?;

    info!(course = %course.name, language = %course.language, "course opened");

    match cli.command {
        Command::List => cmd_list(&course, &store).await,
        Command::Status => cmd_status(&course, &store).await,
        Command::Run { id, force } => cmd_run(&course, &store, &id, force).await,
        Command::RunAll => cmd_run_all(&course, &store).await,
        Command::Hint { id } => cmd_hint(&config, &course, &store, &id).await,
        Command::Reset { yes } => cmd_reset(&store, yes).await,
    }
}

async fn records(store: &ProgressStore) -> Result<HashMap<String, AttemptRecord>> {
    Ok(unlock::index_records(store.attempts().await?))
}

fn status_glyph(status: ExerciseStatus) -> colored::ColoredString {
    match status {
        ExerciseStatus::Completed => "✓".green(),
        ExerciseStatus::InProgress => "~".yellow(),
        ExerciseStatus::Available => ">".cyan(),
        ExerciseStatus::Locked => "-".dimmed(),
    }
}

/// List every exercise with its derived status
async fn cmd_list(course: &Course, store: &ProgressStore) -> Result<()> {
    let records = records(store).await?;
    let ordered_ids = course.ordered_ids();

    println!("{} ({})", course.name.bold(), course.language);
    for (index, exercise) in course.exercises.iter().enumerate() {
        let status = unlock::status_of(index, &ordered_ids, &records);
        let line = format!("{:3}. {:<24} {}", exercise.order, exercise.id, status);
        if status == ExerciseStatus::Locked {
            println!(" {} {}", status_glyph(status), line.dimmed());
        } else {
            println!(" {} {}", status_glyph(status), line);
        }
    }

    let progress = unlock::course_progress(&ordered_ids, &records);
    println!(
        "\n{}/{} completed ({:.0}%)",
        progress.completed, progress.total, progress.percent
    );
    Ok(())
}

/// Show course progress and usage counters
async fn cmd_status(course: &Course, store: &ProgressStore) -> Result<()> {
    let records = records(store).await?;
    let ordered_ids = course.ordered_ids();
    let progress = unlock::course_progress(&ordered_ids, &records);

    println!("Course:     {}", course.name);
    println!("Language:   {}", course.language);
    println!(
        "Progress:   {}/{} exercises ({:.0}%)",
        progress.completed, progress.total, progress.percent
    );
    println!("Test runs:  {}", store.counter(TEST_RUN_COUNTER).await?);
    println!("Hints used: {}", store.counter(HINT_COUNTER).await?);
    Ok(())
}

/// Run one exercise's tests interactively
async fn cmd_run(course: &Course, store: &ProgressStore, id: &str, force: bool) -> Result<()> {
    let exercise = course.exercise(id).ok_or_else(|| eyre!("no such exercise: {id}"))?;
    let index = course.position(id).expect("exercise came from this course");

    let ordered_ids = course.ordered_ids();
    let before = records(store).await?;
    if unlock::status_of(index, &ordered_ids, &before) == ExerciseStatus::Locked && !force {
        println!(
            "{} '{}' is locked; complete the earlier exercises first (or pass --force)",
            "blocked:".red(),
            id
        );
        return Ok(());
    }

    let runner = TestRunner::new(course.root.clone(), store.clone(), Arc::new(StdoutSink));
    let result = runner.run(exercise, course.language, RunMode::Interactive).await?;

    match result.outcome {
        TestOutcome::Passed => println!("\n{} {}", "passed:".green().bold(), exercise.title),
        TestOutcome::Failed => println!(
            "\n{} {} (exit code {})",
            "failed:".red().bold(),
            exercise.title,
            result.exit_code
        ),
        TestOutcome::Error => println!(
            "\n{} could not run the tests for {}",
            "error:".red().bold(),
            exercise.title
        ),
    }

    let after = records(store).await?;
    let status = unlock::status_of(index, &ordered_ids, &after);
    println!("status: {status}");
    Ok(())
}

/// Run the whole course sequentially with live progress
async fn cmd_run_all(course: &Course, store: &ProgressStore) -> Result<()> {
    let runner = Arc::new(TestRunner::new(
        course.root.clone(),
        store.clone(),
        Arc::new(StdoutSink),
    ));
    let batch = BatchRunner::new(runner.clone());
    let cancel = CancelFlag::new();

    // Ctrl-C stops scheduling further exercises and kills the live test
    {
        let cancel = cancel.clone();
        let runner = runner.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ncancelling after the current exercise...");
                cancel.cancel();
                runner.cancel().await;
            }
        });
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<BatchProgress>();
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = progress_rx.recv().await {
            match &snapshot.current {
                Some(id) => println!(
                    "[{}/{}] running {} ({} passed, {} failed)",
                    snapshot.completed, snapshot.total, id, snapshot.passed, snapshot.failed
                ),
                None => println!(
                    "[{}/{}] {} passed, {} failed",
                    snapshot.completed, snapshot.total, snapshot.passed, snapshot.failed
                ),
            }
        }
    });

    let outcome = batch.run_all(&course.exercises, course.language, &cancel, &progress_tx).await?;
    drop(progress_tx);
    let _ = printer.await;

    let report = outcome.report();
    match &outcome {
        BatchOutcome::Completed(_) => println!("\n{}", "batch complete".bold()),
        BatchOutcome::Cancelled(_) => println!("\n{}", "batch cancelled".yellow().bold()),
    }
    println!(
        "attempted {}: {} {}, {} {}, {} {}",
        report.attempted(),
        report.passed,
        "passed".green(),
        report.failed,
        "failed".red(),
        report.errored,
        "errored".dimmed(),
    );
    Ok(())
}

/// Ask the local AI endpoint for a hint on one exercise
async fn cmd_hint(config: &Config, course: &Course, store: &ProgressStore, id: &str) -> Result<()> {
    let exercise = course.exercise(id).ok_or_else(|| eyre!("no such exercise: {id}"))?;
    let source = fs::read_to_string(&exercise.source_path)
        .context(format!("Failed to read {}", exercise.source_path.display()))?;

    // Capture failing output for context unless the exercise already passes
    let index = course.position(id).expect("exercise came from this course");
    let ordered_ids = course.ordered_ids();
    let current = unlock::status_of(index, &ordered_ids, &records(store).await?);

    let failing_output = if current == ExerciseStatus::Completed {
        None
    } else {
        let runner = TestRunner::new(course.root.clone(), store.clone(), Arc::new(dojo::runner::NullSink));
        match runner.run(exercise, course.language, RunMode::Silent).await {
            Ok(result) if result.outcome != TestOutcome::Passed => Some(result.output),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "could not capture test output for hint");
                None
            }
        }
    };

    println!("asking {} for a hint...", config.hint.model);
    let client = HintClient::from_config(&config.hint, store.clone())?;
    let hint = client
        .hint_for(exercise, &source, failing_output.as_deref())
        .await
        .context("Hint request failed")?;

    println!("\n{}\n{}", "hint:".cyan().bold(), hint.trim());
    Ok(())
}

/// Delete all recorded progress for this course
async fn cmd_reset(store: &ProgressStore, yes: bool) -> Result<()> {
    if !yes {
        print!("Delete all recorded progress for this course? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("aborted");
            return Ok(());
        }
    }

    store.reset().await?;
    println!("progress reset; every exercise after the first is locked again");
    Ok(())
}
