//! Stage execution boundary
//!
//! The orchestrator hands a [`StageContext`] to a [`StageExecutor`] and gets back
//! a [`StageResult`] or a [`StageError`]. Executor output is parsed strictly;
//! nothing malformed turns into a success.

pub mod command;
mod error;
mod executor;
mod result;

pub use command::{CommandError, CommandOutput, CommandRequest, run_command};
pub use error::StageError;
pub use executor::{CommandStageExecutor, RetryContext, StageContext, StageExecutor};
pub use result::{QualityIssue, StageResult};
