//! Event bus for workflow observability
//!
//! The orchestrator emits a [`ForgeEvent`] for every task, stage and gate
//! transition. Consumers subscribe to the [`EventBus`]: the [`EventLogger`]
//! writes them to `<runs-dir>/<workflow-id>/events.jsonl`, and `tf run`
//! prints progress lines from the same stream.
//!
//! ```text
//!   Orchestrator ──emit──▶ EventBus (broadcast) ──▶ EventLogger (.jsonl)
//!                                               └─▶ CLI progress
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EVENTS_FILE, EventLogger, read_workflow_events, spawn_event_logger};
pub use types::{EventLogEntry, ForgeEvent};
