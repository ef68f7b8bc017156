// src/sandbox/mod.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SubmissionFault};

pub mod local;

pub use local::LocalSandbox;

/// Resource limits applied to every process started inside a sandbox.
/// `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// CPU time in seconds
    pub cputime: Option<u64>,
    /// Wall-clock time in seconds
    pub realtime: Option<u64>,
    /// Memory in megabytes
    pub memory: Option<u64>,
}

/// A file placed in the sandbox working directory before anything runs.
#[derive(Debug, Clone)]
pub struct SandboxFile {
    pub name: String,
    pub content: Vec<u8>,
    pub executable: bool,
}

impl SandboxFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            executable: false,
        }
    }

    pub fn executable(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            executable: true,
            ..Self::new(name, content)
        }
    }
}

/// What one execution inside the sandbox produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub oom_killed: bool,
}

impl RunOutput {
    /// Classifies a run that cannot be scored. Checked in the order the
    /// categories are reported to students.
    pub fn fault(&self) -> Option<SubmissionFault> {
        if self.timed_out {
            Some(SubmissionFault::Timeout)
        } else if self.oom_killed {
            Some(SubmissionFault::ResourceExceeded)
        } else if self.exit_code != Some(0) {
            Some(SubmissionFault::RuntimeError)
        } else {
            None
        }
    }

    pub fn stderr_tail(&self, max: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let start = text
            .char_indices()
            .rev()
            .nth(max.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        text[start..].trim().to_string()
    }
}

/// The isolated runtime that executes untrusted code. Handles are released
/// when dropped.
#[async_trait]
pub trait Sandbox: Send + Sync {
    type Handle: Send + Sync;

    async fn create(
        &self,
        profile: &str,
        command: &str,
        files: Vec<SandboxFile>,
        limits: &Limits,
    ) -> Result<Self::Handle>;

    /// Runs the handle's command once, feeding `stdin`.
    async fn run(&self, handle: &Self::Handle, stdin: &[u8]) -> Result<RunOutput>;
}
