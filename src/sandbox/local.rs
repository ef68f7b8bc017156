// src/sandbox/local.rs

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::errors::{GradeError, Result};
use crate::sandbox::{Limits, RunOutput, Sandbox, SandboxFile};

#[cfg(unix)]
const SIGKILL: i32 = 9;
#[cfg(unix)]
const SIGXCPU: i32 = 24;

/// Runs sandbox commands as plain child processes in a scratch directory,
/// bounded by `ulimit`. Provides no isolation: it stands in for the real
/// container runtime on development machines and in tests.
#[derive(Debug, Default, Clone)]
pub struct LocalSandbox;

pub struct LocalHandle {
    id: Uuid,
    profile: String,
    command: String,
    limits: Limits,
    dir: TempDir,
}

impl LocalHandle {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        log::debug!("Releasing sandbox {} ({})", self.id, self.profile);
    }
}

impl LocalSandbox {
    pub fn new() -> Self {
        Self
    }
}

/// Prefixes the command with the limits the shell can enforce.
fn limited_script(command: &str, limits: &Limits) -> String {
    let mut script = String::new();
    if let Some(cpu) = limits.cputime {
        script.push_str(&format!("ulimit -t {} && ", cpu));
    }
    if let Some(mb) = limits.memory {
        script.push_str(&format!("ulimit -v {} && ", mb * 1024));
    }
    script.push_str("exec ");
    script.push_str(command);
    script
}

fn check_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(GradeError::ServiceDefect(format!("illegal sandbox file name '{}'", name)));
    }
    Ok(())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl Sandbox for LocalSandbox {
    type Handle = LocalHandle;

    async fn create(
        &self,
        profile: &str,
        command: &str,
        files: Vec<SandboxFile>,
        limits: &Limits,
    ) -> Result<LocalHandle> {
        let dir = tempfile::Builder::new().prefix("sandbox-").tempdir()?;

        for file in files {
            check_file_name(&file.name)?;
            let path = dir.path().join(&file.name);
            tokio::fs::write(&path, &file.content).await?;
            if file.executable {
                make_executable(&path).await?;
            }
        }

        let handle = LocalHandle {
            id: Uuid::new_v4(),
            profile: profile.to_string(),
            command: command.to_string(),
            limits: *limits,
            dir,
        };
        log::debug!(
            "Created sandbox {} ({}) at {}",
            handle.id,
            handle.profile,
            handle.path().display()
        );
        Ok(handle)
    }

    async fn run(&self, handle: &LocalHandle, stdin: &[u8]) -> Result<RunOutput> {
        let start = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(limited_script(&handle.command, &handle.limits))
            .current_dir(handle.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Fed from a task so a program that writes before reading cannot
        // deadlock against us.
        if let Some(mut pipe) = child.stdin.take() {
            let data = stdin.to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&data).await;
            });
        }

        let waited = match handle.limits.realtime {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await,
            None => Ok(child.wait_with_output().await),
        };

        let output = match waited {
            Ok(output) => output?,
            Err(_) => {
                log::debug!("Sandbox {} hit the wall-clock limit", handle.id);
                return Ok(RunOutput {
                    exit_code: None,
                    timed_out: true,
                    ..Default::default()
                });
            }
        };

        let mut result = RunOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
            timed_out: false,
            oom_killed: false,
        };

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            match output.status.signal() {
                Some(SIGXCPU) => result.timed_out = true,
                Some(SIGKILL) => result.oom_killed = true,
                _ => {}
            }
        }

        log::debug!(
            "Sandbox {} finished in {}ms with {:?}",
            handle.id,
            start.elapsed().as_millis(),
            result.exit_code
        );
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_limited_script() {
        let limits = Limits {
            cputime: Some(1),
            realtime: Some(5),
            memory: Some(64),
        };
        assert_eq!(
            limited_script("python3 main.py", &limits),
            "ulimit -t 1 && ulimit -v 65536 && exec python3 main.py"
        );
        assert_eq!(limited_script("./run", &Limits::default()), "exec ./run");
    }

    #[tokio::test]
    async fn test_runs_command_with_stdin() {
        let sandbox = LocalSandbox::new();
        let files = vec![SandboxFile::new("main.sh", "read line\necho \"got $line\"\n")];
        let handle = sandbox
            .create("shell", "sh main.sh", files, &Limits::default())
            .await
            .unwrap();

        let first = sandbox.run(&handle, b"one\n").await.unwrap();
        let second = sandbox.run(&handle, b"two\n").await.unwrap();

        assert_eq!(first.exit_code, Some(0));
        assert_eq!(String::from_utf8_lossy(&first.stdout), "got one\n");
        assert_eq!(String::from_utf8_lossy(&second.stdout), "got two\n");
        assert!(first.fault().is_none());
    }

    #[tokio::test]
    async fn test_wall_clock_timeout() {
        let sandbox = LocalSandbox::new();
        let limits = Limits {
            realtime: Some(1),
            ..Default::default()
        };
        let handle = sandbox.create("shell", "sleep 5", vec![], &limits).await.unwrap();

        let started = Instant::now();
        let output = sandbox.run(&handle, b"").await.unwrap();

        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let sandbox = LocalSandbox::new();
        let files = vec![SandboxFile::new("main.sh", "echo oops >&2\nexit 3\n")];
        let handle = sandbox
            .create("shell", "sh main.sh", files, &Limits::default())
            .await
            .unwrap();

        let output = sandbox.run(&handle, b"").await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr_tail(100), "oops");
    }

    #[tokio::test]
    async fn test_executable_files_and_cleanup() {
        let sandbox = LocalSandbox::new();
        let files = vec![SandboxFile::executable("run", "#!/bin/sh\necho ready\n")];
        let handle = sandbox.create("server", "./run", files, &Limits::default()).await.unwrap();
        let dir = handle.path().to_path_buf();

        let output = sandbox.run(&handle, b"").await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "ready\n");

        drop(handle);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let sandbox = LocalSandbox::new();
        let files = vec![SandboxFile::new("../escape.py", "")];
        assert!(sandbox.create("python", "true", files, &Limits::default()).await.is_err());
    }
}
