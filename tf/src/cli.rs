//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TaskForge - milestone-gated task pipeline orchestrator
#[derive(Parser)]
#[command(
    name = "tf",
    about = "Drives a request's tasks through gap analysis, plan, implement, validate and quality check",
    version,
    after_help = "Logs are written to: ~/.local/share/taskforge/logs/taskforge.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start a workflow from a plan file
    Run {
        /// YAML plan (request, milestones, initial tasks)
        plan: PathBuf,

        /// Checkpoint path (default: <runs-dir>/<workflow-id>/checkpoint.json)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Continue a workflow from its checkpoint
    Resume {
        checkpoint: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show statistics, the active milestone and the ready set
    Status {
        checkpoint: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Render the final report of a checkpoint
    Report {
        checkpoint: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Set a task and its open dependents aside
    Defer {
        checkpoint: PathBuf,

        /// Task ID, unique ID prefix or slug fragment
        task_id: String,

        /// Why the task is deferred
        #[arg(short, long, default_value = "deferred by operator")]
        reason: String,
    },

    /// Load a plan and report integrity errors without running it
    Validate { plan: PathBuf },
}

/// Output format for run/status/report commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file written by `tf`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskforge")
        .join("logs")
        .join("taskforge.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["tf", "run", "plan.yml"]);
        if let Command::Run {
            plan,
            checkpoint,
            format,
        } = cli.command
        {
            assert_eq!(plan, PathBuf::from("plan.yml"));
            assert!(checkpoint.is_none());
            assert_eq!(format, OutputFormat::Text);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_run_with_checkpoint() {
        let cli = Cli::parse_from(["tf", "run", "plan.yml", "--checkpoint", "cp.json", "-f", "json"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                checkpoint: Some(_),
                format: OutputFormat::Json,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parse_defer() {
        let cli = Cli::parse_from(["tf", "defer", "cp.json", "task-1", "--reason", "later"]);
        if let Command::Defer {
            checkpoint,
            task_id,
            reason,
        } = cli.command
        {
            assert_eq!(checkpoint, PathBuf::from("cp.json"));
            assert_eq!(task_id, "task-1");
            assert_eq!(reason, "later");
        } else {
            panic!("Expected Defer command");
        }
    }

    #[test]
    fn test_cli_parse_status_and_report() {
        assert!(matches!(
            Cli::parse_from(["tf", "status", "cp.json"]).command,
            Command::Status { .. }
        ));
        assert!(matches!(
            Cli::parse_from(["tf", "report", "cp.json"]).command,
            Command::Report { .. }
        ));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["tf", "-c", "/path/to/config.yml", "validate", "plan.yml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
        assert!(matches!(cli.command, Command::Validate { .. }));
    }
}
