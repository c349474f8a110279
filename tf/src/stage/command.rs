//! Shell command runner shared by the command-backed collaborators
//!
//! Commands run under `sh -c` with a JSON request on stdin. Each call is bounded
//! by a timeout and a cancellation token; the child is killed when the call is
//! abandoned.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest stderr tail kept in an error
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Command I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Command exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("Command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Command cancelled")]
    Cancelled,
}

/// One invocation of an external command
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, then stdin is closed
    pub input: String,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, input: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            env: Vec::new(),
            input: input.into(),
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Raw bytes; callers decode them strictly
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Stdout as text, rejecting invalid UTF-8
    pub fn stdout_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.stdout)
    }
}

/// Run a command to completion
///
/// A non-zero exit is an error; stdout is returned undecoded for the caller
/// to parse.
pub async fn run_command(request: CommandRequest, cancel: &CancellationToken) -> Result<CommandOutput, CommandError> {
    debug!(command = %request.command, timeout_ms = request.timeout.as_millis() as u64, "run_command: called");
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled);
    }

    let start = Instant::now();
    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg(&request.command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &request.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in &request.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(CommandError::Spawn)?;

    // Feed stdin from its own task so a child that writes before reading
    // cannot deadlock against us
    if let Some(mut stdin) = child.stdin.take() {
        let input = request.input.into_bytes();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "run_command: stdin closed early");
            }
        });
    }

    let output = tokio::select! {
        _ = cancel.cancelled() => {
            warn!(command = %request.command, "run_command: cancelled");
            return Err(CommandError::Cancelled);
        }
        result = tokio::time::timeout(request.timeout, child.wait_with_output()) => match result {
            Err(_) => {
                warn!(command = %request.command, "run_command: timed out");
                return Err(CommandError::Timeout(request.timeout));
            }
            Ok(output) => output.map_err(CommandError::Io)?,
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(CommandError::Exit {
            code: output.status.code(),
            stderr: tail(&stderr, STDERR_TAIL),
        });
    }

    debug!(duration_ms, "run_command: finished");
    Ok(CommandOutput {
        stdout: output.stdout,
        stderr,
        duration_ms,
    })
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_stdin_and_env_reach_command() {
        let request = CommandRequest::new("cat; printf \" $TF_STAGE\"", "{\"a\":1}", Duration::from_secs(10))
            .with_env("TF_STAGE", "plan");
        let output = run_command(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.stdout_str().unwrap(), "{\"a\":1} plan");
    }

    #[tokio::test]
    async fn test_working_dir() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();
        let request = CommandRequest::new("cat marker.txt", "", Duration::from_secs(10))
            .with_working_dir(Some(temp.path().to_path_buf()));
        let output = run_command(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.stdout_str().unwrap(), "here");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let request = CommandRequest::new("echo broken >&2; exit 3", "", Duration::from_secs(10));
        let err = run_command(request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CommandError::Exit { code: Some(3), ref stderr } if stderr == "broken"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let request = CommandRequest::new("sleep 10", "", Duration::from_millis(100));
        let err = run_command(request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let request = CommandRequest::new("sleep 10", "", Duration::from_secs(30));
        let err = run_command(request, &cancel).await.unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
    }

    #[tokio::test]
    async fn test_stdout_kept_as_bytes() {
        let request = CommandRequest::new(r"printf 'ok\377'", "", Duration::from_secs(10));
        let output = run_command(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.stdout, b"ok\xff");
        assert!(output.stdout_str().is_err());
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("  ab \n", 3), "ab");
    }
}
