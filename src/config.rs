// src/config.rs
use crate::errors::{GradeError, Result};
use crate::sandbox::Limits;
use std::net::SocketAddr;
use std::path::PathBuf;

/// How the batch path launches a submission inside its sandbox.
#[derive(Debug, Clone)]
pub struct BatchProfile {
    pub profile: String,
    pub command: String,
    pub file_name: String,
    pub limits: Limits,
}

/// Sandbox settings for interactive sessions. Two processes share the
/// container, so the wall-clock budget is far looser than for batch runs.
#[derive(Debug, Clone)]
pub struct InteractiveProfile {
    pub profile: String,
    pub session_server_bin: PathBuf,
    pub limits: Limits,
}

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub grader_root: PathBuf,
    pub bind: SocketAddr,
    /// Swallow service defects and answer with an opaque message
    pub fail_open: bool,
    /// Grade every submission in its own worker process
    pub fork_per_item: bool,
    pub batch: BatchProfile,
    pub interactive: InteractiveProfile,
    pub alert_webhook: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let grader_root = PathBuf::from(text("GRADER_ROOT", "/tmp/"));
        let bind = text("GRADER_BIND", "0.0.0.0:8080")
            .parse()
            .map_err(|e| GradeError::Config(format!("GRADER_BIND: {}", e)))?;

        let fail_open = parse_flag(&lookup, "GRADER_FAIL_OPEN", true)?;
        let fork_per_item = parse_flag(&lookup, "GRADER_FORK_PER_ITEM", true)?;

        let batch = BatchProfile {
            profile: text("BATCH_PROFILE", "python"),
            command: text("BATCH_COMMAND", "python3 main.py"),
            file_name: text("BATCH_FILE", "main.py"),
            limits: Limits {
                cputime: parse_limit(&lookup, "BATCH_CPU_SECS", Some(1))?,
                realtime: parse_limit(&lookup, "BATCH_REAL_SECS", Some(5))?,
                memory: parse_limit(&lookup, "BATCH_MEMORY_MB", Some(64))?,
            },
        };

        let session_server_bin = match lookup("SESSION_SERVER_BIN") {
            Some(path) => PathBuf::from(path),
            None => default_session_server_bin()?,
        };

        let interactive = InteractiveProfile {
            profile: text("INTERACTIVE_PROFILE", "server"),
            session_server_bin,
            limits: Limits {
                cputime: parse_limit(&lookup, "INTERACTIVE_CPU_SECS", None)?,
                realtime: parse_limit(&lookup, "INTERACTIVE_REAL_SECS", Some(120))?,
                memory: parse_limit(&lookup, "INTERACTIVE_MEMORY_MB", Some(256))?,
            },
        };

        let alert_webhook = lookup("ALERT_WEBHOOK_URL").filter(|url| !url.trim().is_empty());

        Ok(AppConfig {
            grader_root,
            bind,
            fail_open,
            fork_per_item,
            batch,
            interactive,
            alert_webhook,
        })
    }
}

fn default_session_server_bin() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| GradeError::Config("cannot locate the executable directory".to_string()))?;
    Ok(dir.join("session-server"))
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(v) => Err(GradeError::Config(format!("{}: expected a boolean, got '{}'", key, v))),
    }
}

/// `none` (or any non-positive value) lifts the limit.
fn parse_limit<F>(lookup: &F, key: &str, default: Option<u64>) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| GradeError::Config(format!("{}: expected a number, got '{}'", key, raw)))?;
    Ok(u64::try_from(value).ok().filter(|v| *v > 0))
}
