//! TaskForge - milestone-gated task pipeline orchestrator
//!
//! CLI entry point for running, resuming and inspecting workflows.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskforge::cli::{Cli, Command, OutputFormat, get_log_path};
use taskforge::config::Config;
use taskforge::domain::IdResolver;
use taskforge::events::{EventBus, ForgeEvent, spawn_event_logger};
use taskforge::gate::{CommandAssessment, CommandExpansion, ExpansionGate};
use taskforge::orchestrator::{FinalReport, Orchestrator};
use taskforge::stage::CommandStageExecutor;
use taskforge::state::StateManager;
use taskforge::workflow::{PlanFile, Workflow};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            plan,
            checkpoint,
            format,
        } => cmd_run(&config, &plan, checkpoint, format).await,
        Command::Resume { checkpoint, format } => cmd_resume(&config, &checkpoint, format).await,
        Command::Status { checkpoint, format } => cmd_status(&checkpoint, format),
        Command::Report { checkpoint, format } => cmd_report(&checkpoint, format),
        Command::Defer {
            checkpoint,
            task_id,
            reason,
        } => cmd_defer(&checkpoint, &task_id, &reason),
        Command::Validate { plan } => cmd_validate(&config, &plan),
    }
}

/// Start a workflow from a plan file
async fn cmd_run(config: &Config, plan: &Path, checkpoint: Option<PathBuf>, format: OutputFormat) -> Result<ExitCode> {
    config.validate()?;
    let workflow = PlanFile::load(plan)?.into_workflow(config.workflow.max_attempts)?;
    let checkpoint = checkpoint.unwrap_or_else(|| config.storage.default_checkpoint(&workflow.id));
    execute(config, workflow, checkpoint, false, format).await
}

/// Continue a workflow from its checkpoint
async fn cmd_resume(config: &Config, checkpoint: &Path, format: OutputFormat) -> Result<ExitCode> {
    config.validate()?;
    let workflow = Workflow::load_checkpoint(checkpoint)
        .with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))?;
    execute(config, workflow, checkpoint.to_path_buf(), true, format).await
}

async fn execute(
    config: &Config,
    workflow: Workflow,
    checkpoint: PathBuf,
    resumed: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let workflow_id = workflow.id.clone();
    info!(%workflow_id, checkpoint = %checkpoint.display(), resumed, "execute: starting workflow");

    let bus = Arc::new(EventBus::with_default_capacity());
    let logger = spawn_event_logger(&bus, &config.storage.runs_dir);
    let progress = (format == OutputFormat::Text).then(|| tokio::spawn(print_progress(bus.subscribe())));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping at the next boundary");
                cancel.cancel();
            }
        });
    }

    let state = StateManager::spawn(
        workflow,
        Some(checkpoint.clone()),
        ExpansionGate::from_config(&config.workflow),
    );
    let working_dir = config.stages.working_dir.clone();
    let orchestrator = Orchestrator::new(
        state.clone(),
        Arc::new(CommandStageExecutor::new(config.stages.clone())),
        Arc::new(CommandAssessment::new(config.assessment.clone(), working_dir.clone())),
        Arc::new(CommandExpansion::new(config.expansion.clone(), working_dir)),
        bus.emitter_for(&workflow_id),
        cancel,
    )
    .with_assessment_retry(config.workflow.assessment_retry())
    .resumed(resumed);

    let report = orchestrator.run().await.context("Workflow run failed")?;
    state.checkpoint().await.context("Failed to save final checkpoint")?;
    state.shutdown().await?;

    // Closing every sender lets the logger and the progress printer drain
    drop(orchestrator);
    drop(bus);
    if let Err(e) = logger.await {
        warn!(error = %e, "Event logger task failed");
    }
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    print_report(&report, format)?;
    if format == OutputFormat::Text {
        println!("Checkpoint: {}", checkpoint.display());
    }
    Ok(exit_code(report.exit_code()))
}

/// Print one line per notable event until the bus closes
async fn print_progress(mut rx: broadcast::Receiver<ForgeEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ForgeEvent::TaskStarted {
                task_id, milestone, ..
            } => println!("{} {} ({})", "▶".cyan(), task_id, milestone),
            ForgeEvent::TaskRetried {
                task_id,
                failed_stage,
                retry_stage,
                attempt,
                max_attempts,
                reason,
                ..
            } => println!(
                "  {} {} {} failed ({}/{}), back to {}: {}",
                "↻".yellow(),
                task_id,
                failed_stage,
                attempt,
                max_attempts,
                retry_stage,
                reason
            ),
            ForgeEvent::TaskCompleted { task_id, .. } => println!("  {} {}", "✓".green(), task_id),
            ForgeEvent::TaskFailed {
                task_id, stage, reason, ..
            } => println!("  {} {} at {}: {}", "✗".red(), task_id, stage, reason),
            ForgeEvent::TasksBlocked { blocked, .. } => {
                println!("  {} blocked: {}", "!".red(), blocked.join(", "))
            }
            ForgeEvent::ExpansionApplied {
                milestone, accepted, ..
            } => println!("{} {} new task(s) for {}", "+".cyan(), accepted.len(), milestone),
            ForgeEvent::MilestoneAdvanced { completed, next, .. } => match next {
                Some(next) => println!("{} milestone {} complete, now {}", "■".green(), completed, next),
                None => println!("{} milestone {} complete", "■".green(), completed),
            },
            _ => {}
        }
    }
}

/// Show statistics, the active milestone and the ready set
fn cmd_status(checkpoint: &Path, format: OutputFormat) -> Result<ExitCode> {
    let workflow = load(checkpoint)?;
    let stats = workflow.graph().get_statistics();
    let active = workflow.active_milestone();
    let ready: Vec<&str> = active
        .map(|m| {
            workflow
                .graph()
                .get_ready_tasks(Some(&m.id))
                .into_iter()
                .map(|t| t.id.as_str())
                .collect()
        })
        .unwrap_or_default();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "workflow_id": workflow.id,
                "request": workflow.request,
                "run_state": workflow.run_state(),
                "active_milestone": active.map(|m| m.id.as_str()),
                "counters": workflow.counters(),
                "statistics": stats,
                "ready": ready,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("Workflow {}", workflow.id.bold());
            println!("Request: {}", workflow.request);
            println!("State: {:?}", workflow.run_state());
            match active {
                Some(m) => println!("Active milestone: {} ({})", m.id, m.description),
                None => println!("Active milestone: none (all complete)"),
            }
            println!("Gate iterations: {}", workflow.counters().iteration);
            println!(
                "Tasks: {} total, {} pending, {} ready, {} in progress, {} complete, {} failed, {} blocked, {} deferred",
                stats.total,
                stats.pending,
                stats.ready,
                stats.in_progress,
                stats.complete,
                stats.failed,
                stats.blocked,
                stats.deferred
            );
            if ready.is_empty() {
                println!("Ready: none");
            } else {
                println!("Ready: {}", ready.join(", "));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Render the final report of a checkpoint
fn cmd_report(checkpoint: &Path, format: OutputFormat) -> Result<ExitCode> {
    let report = FinalReport::from_workflow(&load(checkpoint)?);
    print_report(&report, format)?;
    Ok(ExitCode::SUCCESS)
}

/// Defer a task in a checkpoint so a resumed run can move past it
fn cmd_defer(checkpoint: &Path, task_ref: &str, reason: &str) -> Result<ExitCode> {
    let mut workflow = load(checkpoint)?;
    let task_id = resolve_task(&workflow, task_ref)?;
    let cascaded = workflow
        .defer(&task_id, reason)
        .with_context(|| format!("Failed to defer task {}", task_id))?;
    workflow.save_checkpoint(checkpoint)?;

    info!(%task_id, cascaded = cascaded.len(), "cmd_defer: task deferred");
    println!("Deferred {}", task_id);
    if !cascaded.is_empty() {
        println!("Also deferred: {}", cascaded.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

/// Load a plan and report integrity errors without running it
fn cmd_validate(config: &Config, plan: &Path) -> Result<ExitCode> {
    let workflow = PlanFile::load(plan)?.into_workflow(config.workflow.max_attempts)?;
    println!(
        "{} {}: {} milestone(s), {} task(s)",
        "valid".green(),
        plan.display(),
        workflow.registry().milestones().len(),
        workflow.graph().len()
    );
    if let Err(e) = config.validate() {
        println!("{} {}", "warning:".yellow(), e);
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolve a full task ID, a unique ID prefix or a slug fragment
fn resolve_task(workflow: &Workflow, reference: &str) -> Result<String> {
    let resolver = IdResolver::new(workflow.graph().tasks().map(|t| t.id.as_str()));
    match resolver.resolve(reference) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(eyre!("No task matches '{}'", reference)),
        Err(candidates) => Err(eyre!("'{}' matches several tasks: {}", reference, candidates.join(", "))),
    }
}

fn load(checkpoint: &Path) -> Result<Workflow> {
    Workflow::load_checkpoint(checkpoint).with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))
}

fn print_report(report: &FinalReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(())
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
