//! Script execution and its recorded outcome

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::provider::Provider;

/// Maximum amount of script output kept and logged per stream
pub const MAX_LOGGED_OUTPUT: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// How a script run ended
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    SpawnFailed,
    Interrupted,
}

/// A resolved script waiting for a worker
#[derive(Debug, Clone)]
pub struct ScriptJob {
    pub id: String,
    pub provider: Provider,
    pub repo: String,
    pub event: String,
    pub path: PathBuf,
}

impl ScriptJob {
    pub fn new(provider: Provider, repo: String, event: String, path: PathBuf) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            provider,
            repo,
            event,
            path,
        }
    }
}

/// Outcome of one script run. Only logged and broadcast in-process.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub id: String,
    pub repo: String,
    pub event: String,
    pub path: PathBuf,
    /// `None` when the process never started, was interrupted, or died by signal
    pub exit_code: Option<i32>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn new(job: &ScriptJob, started_at: DateTime<Utc>) -> Self {
        Self {
            id: job.id.clone(),
            repo: job.repo.clone(),
            event: job.event.clone(),
            path: job.path.clone(),
            exit_code: None,
            status: ExecutionStatus::Failed,
            error: None,
            started_at,
            completed_at: started_at,
        }
    }

    fn finish(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self.completed_at = Utc::now();
        self
    }

    /// Outcome for a job whose wait was cut short by shutdown.
    pub(crate) fn interrupted(job: &ScriptJob) -> Self {
        let mut result = Self::new(job, Utc::now()).finish(ExecutionStatus::Interrupted);
        result.error = Some("interrupted".to_string());
        result
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Runs scripts, optionally behind a launcher prefix such as `sudo -n`.
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor {
    launcher: Vec<String>,
}

impl ScriptExecutor {
    pub fn new(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    fn command(&self, path: &Path) -> Command {
        // The working directory changes below, so a relative path would be ambiguous.
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let path = path.as_path();
        let mut cmd = match self.launcher.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(path);
                cmd
            }
            None => Command::new(path),
        };
        if let Some(dir) = path.parent() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd
    }

    /// Spawn the script and wait for it to exit.
    ///
    /// If `shutdown` flips to `true` while waiting, the wait is abandoned and
    /// the child keeps running.
    pub async fn execute(
        &self,
        job: &ScriptJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let result = ExecutionResult::new(job, started_at);

        info!(
            "Job {} - running '{}' for {} repo '{}' event '{}'",
            job.id,
            job.path.display(),
            job.provider,
            job.repo,
            job.event
        );

        let mut child = match self.command(&job.path).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Job {} - '{}' failed to start: {}", job.id, job.path.display(), e);
                let mut result = result.finish(ExecutionStatus::SpawnFailed);
                result.error = Some(format!("failed to start: {}", e));
                return result;
            }
        };

        // The readers outlive an abandoned wait so the child never writes
        // into a closed pipe.
        spawn_drain(&job.id, "stdout", child.stdout.take());
        spawn_drain(&job.id, "stderr", child.stderr.take());

        let pid = child.id();
        let status = tokio::select! {
            status = child.wait() => status,
            _ = wait_for_shutdown(shutdown) => {
                warn!(
                    "Job {} - wait on '{}' (pid {:?}) interrupted, leaving process running",
                    job.id,
                    job.path.display(),
                    pid
                );
                let mut result = ExecutionResult::interrupted(job);
                result.started_at = started_at;
                return result;
            }
        };

        match status {
            Ok(status) => {
                let mut result = if status.success() {
                    result.finish(ExecutionStatus::Success)
                } else {
                    result.finish(ExecutionStatus::Failed)
                };
                result.exit_code = status.code();
                if result.exit_code.is_none() {
                    result.error = Some("terminated by signal".to_string());
                }
                info!(
                    "Job {} - '{}' exited with {:?} after {}ms",
                    job.id,
                    job.path.display(),
                    result.exit_code,
                    result.duration_ms()
                );
                result
            }
            Err(e) => {
                error!("Job {} - waiting on '{}' failed: {}", job.id, job.path.display(), e);
                let mut result = result.finish(ExecutionStatus::Failed);
                result.error = Some(format!("wait failed: {}", e));
                result
            }
        }
    }
}

/// Resolves once the flag reads `true`; pends forever if the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let stopped = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !stopped {
        std::future::pending::<()>().await;
    }
}

/// Output read from one stream: at most `limit` bytes kept, the rest counted.
#[derive(Debug, Default)]
struct CapturedOutput {
    kept: Vec<u8>,
    total: usize,
}

impl CapturedOutput {
    fn truncated(&self) -> bool {
        self.total > self.kept.len()
    }
}

/// Read `reader` to EOF, keeping only the first `limit` bytes.
async fn drain_capped<R>(mut reader: R, limit: usize) -> std::io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedOutput::default();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(captured);
        }
        captured.total += n;
        let room = limit.saturating_sub(captured.kept.len());
        captured.kept.extend_from_slice(&chunk[..n.min(room)]);
    }
}

fn spawn_drain<R>(job_id: &str, stream: &'static str, reader: Option<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else {
        return;
    };
    let job_id = job_id.to_string();
    tokio::spawn(async move {
        match drain_capped(reader, MAX_LOGGED_OUTPUT).await {
            Ok(captured) => log_stream(&job_id, stream, &captured),
            Err(e) => warn!("Job {} - reading {} failed: {}", job_id, stream, e),
        }
    });
}

fn log_stream(job_id: &str, stream: &str, captured: &CapturedOutput) {
    if captured.total == 0 {
        return;
    }
    let text = String::from_utf8_lossy(&captured.kept);
    if captured.truncated() {
        debug!(
            target: "user_script",
            "Job {} {} (truncated, {} of {} bytes):\n{}",
            job_id,
            stream,
            captured.kept.len(),
            captured.total,
            text
        );
    } else {
        debug!(target: "user_script", "Job {} {}:\n{}", job_id, stream, text);
    }
}
