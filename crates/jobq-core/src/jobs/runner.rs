//! Subprocess execution with a hard per-job timeout
//!
//! Commands run through the platform shell (`sh -c` everywhere except
//! Windows, where `cmd.exe /c` is used) so shell syntax inside a job's
//! command behaves identically to typing it at a prompt. Each child is
//! tracked by job id while it runs, which lets shutdown and
//! cancel-running requests terminate it: a graceful termination signal
//! first, a hard kill after a grace period.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::jobs::job::Job;

/// Wait between the graceful termination signal and the hard kill
const KILL_GRACE: Duration = Duration::from_secs(5);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured output of a successful attempt
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Why an execution attempt failed.
///
/// These never cross the store boundary as errors; the worker records
/// their message on the job through the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Command failed with exit code {code}: {output}")]
    NonZeroExit { code: i32, output: String },

    #[error("Job timeout exceeded ({timeout_ms}ms)")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to execute command: {0}")]
    Spawn(String),

    #[error("Job was cancelled while running")]
    Cancelled,
}

/// Seam between the worker pool and subprocess execution
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one attempt of the job, honoring its `timeout_ms`
    async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutionError>;

    /// Terminate the running child for a job, if any. Returns whether
    /// a child was found.
    async fn terminate(&self, job_id: &str) -> bool;

    /// Terminate every running child
    async fn terminate_all(&self);
}

struct ActiveChild {
    cancel: Arc<Notify>,
}

/// Executes job commands through the platform shell
#[derive(Default)]
pub struct ShellRunner {
    active: Mutex<HashMap<String, ActiveChild>>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job ids with a currently running child
    pub async fn active_jobs(&self) -> Vec<String> {
        self.active.lock().await.keys().cloned().collect()
    }

    fn shell_command(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd.exe");
            cmd.arg("/c").arg(command);
            cmd.creation_flags(CREATE_NO_WINDOW);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    /// Send the graceful termination signal, wait out the grace
    /// period, then kill.
    async fn shutdown_child(child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            let grace = tokio::time::sleep(KILL_GRACE);
            tokio::pin!(grace);
            tokio::select! {
                _ = child.wait() => return,
                _ = &mut grace => {
                    warn!(pid, "child ignored termination signal, killing");
                }
            }
        }
        let _ = child.kill().await;
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    WaitFailed(String),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl JobExecutor for ShellRunner {
    async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutionError> {
        let mut cmd = Self::shell_command(&job.command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;
        debug!(job_id = %job.id, pid = ?child.id(), "spawned job command");

        let cancel = Arc::new(Notify::new());
        self.active.lock().await.insert(
            job.id.clone(),
            ActiveChild {
                cancel: cancel.clone(),
            },
        );

        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let timeout = tokio::time::sleep(Duration::from_millis(job.timeout_ms));
        tokio::pin!(timeout);

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => WaitOutcome::WaitFailed(e.to_string()),
            },
            _ = &mut timeout => WaitOutcome::TimedOut,
            _ = cancel.notified() => WaitOutcome::Cancelled,
        };

        if matches!(outcome, WaitOutcome::TimedOut | WaitOutcome::Cancelled) {
            Self::shutdown_child(&mut child).await;
        }
        self.active.lock().await.remove(&job.id);

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        match outcome {
            WaitOutcome::Exited(status) if status.success() => {
                Ok(ExecutionOutput { stdout, stderr })
            }
            WaitOutcome::Exited(status) => {
                let diagnostic = if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.trim().to_string()
                };
                Err(ExecutionError::NonZeroExit {
                    code: status.code().unwrap_or(-1),
                    output: diagnostic,
                })
            }
            WaitOutcome::WaitFailed(reason) => Err(ExecutionError::Spawn(reason)),
            WaitOutcome::TimedOut => Err(ExecutionError::Timeout {
                timeout_ms: job.timeout_ms,
            }),
            WaitOutcome::Cancelled => Err(ExecutionError::Cancelled),
        }
    }

    async fn terminate(&self, job_id: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(job_id) {
            Some(entry) => {
                entry.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    async fn terminate_all(&self) {
        let active = self.active.lock().await;
        for entry in active.values() {
            entry.cancel.notify_one();
        }
    }
}

fn drain<R>(stream: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf).await;
        }
        buf
    })
}
