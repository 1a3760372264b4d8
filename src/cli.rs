//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dojo - course exercise runner with progress gating
#[derive(Parser)]
#[command(
    name = "dojo",
    about = "Run course exercises, track progress, and unlock the next challenge",
    version,
    after_help = "Logs are written to: ~/.local/share/dojo/logs/dojo.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Course directory (containing course.json)
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub course: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
///
/// Every command that targets an exercise takes its id explicitly; there
/// is no ambient "current exercise" state.
#[derive(Subcommand)]
pub enum Command {
    /// List exercises with their lock/completion status
    List,

    /// Show course progress and usage counters
    Status,

    /// Run the tests for one exercise
    Run {
        /// Exercise id
        #[arg(value_name = "ID")]
        id: String,

        /// Run even if the exercise is still locked
        #[arg(long)]
        force: bool,
    },

    /// Run the tests for every exercise in order
    RunAll,

    /// Ask the local AI endpoint for a hint on an exercise
    Hint {
        /// Exercise id
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete all recorded progress for this course
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_list() {
        let cli = Cli::parse_from(["dojo", "list"]);
        assert!(matches!(cli.command, Command::List));
        assert_eq!(cli.course, PathBuf::from("."));
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["dojo", "run", "variables"]);
        match cli.command {
            Command::Run { id, force } => {
                assert_eq!(id, "variables");
                assert!(!force);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_force() {
        let cli = Cli::parse_from(["dojo", "run", "variables", "--force"]);
        assert!(matches!(cli.command, Command::Run { force: true, .. }));
    }

    #[test]
    fn test_cli_parse_course_dir() {
        let cli = Cli::parse_from(["dojo", "-C", "/tmp/course", "run-all"]);
        assert_eq!(cli.course, PathBuf::from("/tmp/course"));
        assert!(matches!(cli.command, Command::RunAll));
    }

    #[test]
    fn test_cli_parse_reset_yes() {
        let cli = Cli::parse_from(["dojo", "reset", "--yes"]);
        assert!(matches!(cli.command, Command::Reset { yes: true }));
    }

    #[test]
    fn test_cli_parse_hint() {
        let cli = Cli::parse_from(["dojo", "hint", "loops"]);
        assert!(matches!(cli.command, Command::Hint { id } if id == "loops"));
    }
}
