// src/worker.rs
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::errors::{GradeError, Result};
use crate::models::{Reply, XqueueItem};
use crate::sandbox::Sandbox;
use crate::service::GradingService;

/// Argument that switches the main binary into single-item worker mode.
pub const WORKER_ARG: &str = "worker";

/// Reads the reply from the last non-empty line a child process printed.
pub fn parse_reply(stdout: &[u8]) -> Result<Reply> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| GradeError::ServiceDefect("child printed no result".to_string()))?;

    serde_json::from_str(line)
        .map_err(|e| GradeError::ServiceDefect(format!("unreadable result line '{}': {}", line, e)))
}

/// Grades one item inside this process and returns the reply line to print.
pub async fn serve_stdin<S: Sandbox>(service: &GradingService<S>) -> Result<String> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let item: XqueueItem = serde_json::from_str(&input)?;

    let reply = service.process_item(&item).await?;
    Ok(serde_json::to_string(&reply)?)
}

/// Launches a fresh worker process per item so a crash while grading one
/// submission cannot take the service down with it.
#[derive(Debug, Clone)]
pub struct Worker {
    exe: PathBuf,
    envs: Vec<(String, String)>,
}

impl Worker {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            envs: Vec::new(),
        }
    }

    /// A worker running the binary this process was started from.
    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub async fn grade(&self, item: &XqueueItem) -> Result<Reply> {
        let payload = serde_json::to_vec(item)?;

        let mut child = Command::new(&self.exe)
            .arg(WORKER_ARG)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GradeError::ServiceDefect(format!("cannot start worker {}: {}", self.exe.display(), e))
            })?;

        // A worker that dies early closes its stdin; its exit status says why.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                log::debug!("Worker stdin closed early: {}", e);
            }
        }

        let output = child.wait_with_output().await?;
        log::debug!("Worker exited with {:?}", output.status.code());

        if !output.status.success() {
            return Err(GradeError::ServiceDefect(format!(
                "worker exited with {}",
                output.status
            )));
        }
        parse_reply(&output.stdout)
    }
}
