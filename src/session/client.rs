// src/session/client.rs

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Whatever the driver printed, captured after it ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The student's driver, running as a child of the session server. The
/// command is `exec`ed by the shell so a kill reaches the driver itself.
///
/// Both output pipes are drained in the background from the moment the
/// process starts, so polling it never waits on its I/O.
pub struct ClientProcess {
    child: Child,
    deadline: Instant,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

impl ClientProcess {
    pub fn spawn(command: &str, budget: Duration, session_url: &str) -> io::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("exec {}", command))
            .env("SESSION_URL", session_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        Ok(Self {
            child,
            deadline: Instant::now() + budget,
            stdout,
            stderr,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking completion check.
    pub fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub fn overdue(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("kill of driver {:?} failed: {}", self.child.id(), e);
        }
    }

    /// Reaps the process and gathers its output, giving up after `grace`.
    pub async fn collect(self, grace: Duration) -> ClientOutput {
        let ClientProcess {
            mut child,
            stdout,
            stderr,
            ..
        } = self;

        let reap = async {
            let _ = child.wait().await;
            let (out, err) = futures::future::join(stdout, stderr).await;
            (out.unwrap_or_default(), err.unwrap_or_default())
        };

        match tokio::time::timeout(grace, reap).await {
            Ok((out, err)) => ClientOutput {
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
            },
            Err(_) => ClientOutput {
                stdout: String::new(),
                stderr: "Hangup".to_string(),
            },
        }
    }
}
