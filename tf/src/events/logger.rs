//! Event Logger - persists events to JSONL files
//!
//! Events are appended to `<runs-dir>/<workflow-id>/events.jsonl`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, ForgeEvent};

/// File name of a workflow's event log inside its run directory
pub const EVENTS_FILE: &str = "events.jsonl";

pub struct EventLogger {
    runs_dir: PathBuf,
    /// Open writers per workflow
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Append an event to its workflow's log file
    pub fn write_event(&mut self, event: &ForgeEvent) -> eyre::Result<()> {
        let workflow_id = event.workflow_id();
        debug!(%workflow_id, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(workflow_id) {
            let run_dir = self.runs_dir.join(workflow_id);
            fs::create_dir_all(&run_dir)?;

            let log_path = run_dir.join(EVENTS_FILE);
            debug!(?log_path, "EventLogger: opening log file");
            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(workflow_id.to_string(), BufWriter::new(file));
        }

        let writer = self
            .writers
            .get_mut(workflow_id)
            .ok_or_else(|| eyre::eyre!("No writer for workflow {}", workflow_id))?;

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Flush and drop a workflow's writer
    pub fn close_workflow(&mut self, workflow_id: &str) {
        debug!(%workflow_id, "EventLogger::close_workflow");
        if let Some(mut writer) = self.writers.remove(workflow_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events from the bus until it closes
    pub async fn run(mut self, mut rx: broadcast::Receiver<ForgeEvent>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let workflow_id = event.workflow_id().to_string();
                    let finished = matches!(event, ForgeEvent::WorkflowFinished { .. });

                    if let Err(e) = self.write_event(&event) {
                        error!(%workflow_id, error = %e, "EventLogger: failed to write event");
                    }

                    if finished {
                        self.close_workflow(&workflow_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (workflow_id, mut writer) in self.writers.drain() {
            debug!(%workflow_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read a workflow's logged events, skipping unparseable lines
pub fn read_workflow_events(runs_dir: impl AsRef<Path>, workflow_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = runs_dir.as_ref().join(workflow_id).join(EVENTS_FILE);
    debug!(?log_path, "read_workflow_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_workflow_events: failed to parse line"),
        }
    }

    Ok(entries)
}

/// Spawn the logger as a background task subscribed to `bus`
///
/// Subscribes before returning, so no event emitted afterwards is missed.
pub fn spawn_event_logger(bus: &Arc<EventBus>, runs_dir: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(runs_dir);
    let rx = bus.subscribe();
    tokio::spawn(logger.run(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;
    use tempfile::tempdir;

    fn started(workflow_id: &str) -> ForgeEvent {
        ForgeEvent::TaskStarted {
            workflow_id: workflow_id.to_string(),
            task_id: "t1".to_string(),
            milestone: "m1".to_string(),
            stage: Stage::GapAnalysis,
        }
    }

    #[test]
    fn test_write_and_read_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&started("wf-1")).unwrap();
        logger
            .write_event(&ForgeEvent::WorkflowFinished {
                workflow_id: "wf-1".to_string(),
                outcome: "success".to_string(),
            })
            .unwrap();
        logger.write_event(&started("wf-2")).unwrap();

        let entries = read_workflow_events(temp.path(), "wf-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_type(), "TaskStarted");
        assert_eq!(entries[1].event.event_type(), "WorkflowFinished");
        assert!(temp.path().join("wf-2").join(EVENTS_FILE).exists());
    }

    #[test]
    fn test_read_missing_workflow() {
        let temp = tempdir().unwrap();
        assert!(read_workflow_events(temp.path(), "nope").unwrap().is_empty());
    }

    #[test]
    fn test_close_workflow() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());
        logger.write_event(&started("wf-close")).unwrap();
        assert!(logger.writers.contains_key("wf-close"));
        logger.close_workflow("wf-close");
        assert!(!logger.writers.contains_key("wf-close"));
    }

    #[tokio::test]
    async fn test_spawned_logger_drains_bus() {
        let temp = tempdir().unwrap();
        let bus = Arc::new(EventBus::new(16));
        let handle = spawn_event_logger(&bus, temp.path());

        bus.emit(started("wf-bg"));
        drop(bus);
        handle.await.unwrap();

        let entries = read_workflow_events(temp.path(), "wf-bg").unwrap();
        assert_eq!(entries.len(), 1);
    }
}
