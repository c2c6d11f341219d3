//! Process transport
//!
//! Owns the analysis engine's child process and its three pipes. stdin and
//! stdout are handed to the session's I/O loop; stderr is always drained by a
//! background task so the child can never block on a full pipe.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

// ============================================================================
// Process State
// ============================================================================

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is currently running
    Running { pid: u32 },
    /// Process has been stopped (either gracefully or forcefully)
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            ProcessState::Stopped => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Process Errors
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,
}

// ============================================================================
// Child Process
// ============================================================================

/// Handle to the spawned analysis engine process
pub struct ChildProcess {
    command: String,
    child: Option<Child>,
    state: Arc<Mutex<ProcessState>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ChildProcess {
    /// Spawn the process with redirected stdin/stdout/stderr.
    ///
    /// `stderr_handler` receives each stderr line; without one, stderr is
    /// drained and traced.
    pub fn spawn(
        command: &str,
        args: &[String],
        working_directory: Option<&PathBuf>,
        stderr_handler: Option<Box<dyn Fn(String) + Send + Sync>>,
    ) -> Result<Self, ProcessError> {
        info!("Starting process: {command} {args:?}");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id().unwrap_or(0);
        info!("Process started with PID: {pid}");

        let stderr = child.stderr.take();
        let stderr_task = stderr.map(|stderr| spawn_stderr_drain(stderr, stderr_handler));

        Ok(Self {
            command: command.to_string(),
            child: Some(child),
            state: Arc::new(Mutex::new(ProcessState::Running { pid })),
            stderr_task,
        })
    }

    /// Take ownership of the stdio pipes for the I/O loop.
    ///
    /// Can only succeed once; the pipes are consumed.
    pub fn take_stdio(&mut self) -> Result<(ChildStdin, ChildStdout), ProcessError> {
        let child = self.child.as_mut().ok_or(ProcessError::StdinNotAvailable)?;
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        Ok((stdin, stdout))
    }

    /// Current process state (thread-safe)
    pub fn state(&self) -> ProcessState {
        self.state.lock().unwrap().clone()
    }

    /// Check if the process is still considered running
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Best-effort stop: wait up to `timeout` for the child to exit (the
    /// write end of its stdin should already be closed), then force-kill.
    ///
    /// Always succeeds from the caller's point of view.
    pub async fn stop(&mut self, timeout: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("Stopping process {} (PID {:?})", self.command, child.id());

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process exited with status: {status}");
            }
            Ok(Err(e)) => {
                warn!("Error waiting for process: {e}");
            }
            Err(_) => {
                info!("Process did not exit within {timeout:?}, killing");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill process: {e}");
                }
                let _ = child.wait().await;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        *self.state.lock().unwrap() = ProcessState::Stopped;
    }

    /// Synchronous force kill for Drop fallback paths
    pub fn kill_sync(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill process: {e}");
            }
        }
        self.child = None;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        *self.state.lock().unwrap() = ProcessState::Stopped;
    }
}

/// Drain stderr lines, forwarding them to the handler when one is installed
fn spawn_stderr_drain(
    stderr: tokio::process::ChildStderr,
    handler: Option<Box<dyn Fn(String) + Send + Sync>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    trace!("ChildProcess: stderr EOF reached");
                    break;
                }
                Ok(_) => {
                    let content = line.trim().to_string();
                    if !content.is_empty() {
                        if let Some(ref handler) = handler {
                            handler(content);
                        } else {
                            trace!("ChildProcess: stderr: {content}");
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to read from stderr: {e}");
                    break;
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
