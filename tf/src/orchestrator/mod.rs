//! Orchestration of a workflow run and its final report

mod engine;
mod report;

pub use engine::Orchestrator;
pub use report::{FailedTask, FinalReport, MilestoneLine, ReportOutcome};
