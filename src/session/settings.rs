// src/session/settings.rs

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::errors::{GradeError, Result};

/// How attempts turn into the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scoring {
    /// Each attempt earns completed/total stations; the score is the mean.
    #[default]
    Fractional,
    /// Each attempt either fully succeeds or not; the score is 1 only if
    /// every attempt did.
    AllOrNothing,
}

/// Everything the session server needs, shipped into the sandbox as
/// `session.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub stations: u32,
    /// Attempts aggregated into the final score
    pub sample_size: usize,
    pub attempt_timeout_ms: u64,
    pub tick_ms: u64,
    /// How long a killed driver gets to hand over its output
    pub kill_grace_ms: u64,
    /// Clues are drawn from `0..=clue_max`
    pub clue_max: u32,
    pub start_token: String,
    pub client_command: String,
    /// Name the student's driver is saved under
    pub client_file: String,
    pub scoring: Scoring,
    /// Port 0 picks a free port when the endpoint starts, so concurrent
    /// sessions on one host do not collide.
    pub bind: String,
    /// Delete the settings file once loaded
    pub scrub_config: bool,
    pub seed: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stations: 3,
            sample_size: 20,
            attempt_timeout_ms: 1000,
            tick_ms: 5,
            kill_grace_ms: 100,
            clue_max: 1000,
            start_token: "start".to_string(),
            client_command: "python3 client.py".to_string(),
            client_file: "client.py".to_string(),
            scoring: Scoring::Fractional,
            bind: "127.0.0.1:0".to_string(),
            scrub_config: true,
            seed: None,
        }
    }
}

impl SessionSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: SessionSettings = toml::from_str(&text)?;
        settings.validate().map_err(GradeError::Config)?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.stations == 0 {
            return Err("stations must be at least 1".to_string());
        }
        if self.sample_size == 0 {
            return Err("sample_size must be at least 1".to_string());
        }
        if self.tick_ms == 0 || self.attempt_timeout_ms == 0 {
            return Err("tick_ms and attempt_timeout_ms must be positive".to_string());
        }
        if self.tick_ms >= self.attempt_timeout_ms {
            return Err("tick_ms must be shorter than attempt_timeout_ms".to_string());
        }
        let token = self.start_token.to_ascii_lowercase();
        if token.is_empty() || token.bytes().all(|b| b.is_ascii_digit()) || token.contains('/') {
            return Err(format!("unusable start_token '{}'", self.start_token));
        }
        if self.client_command.trim().is_empty() {
            return Err("client_command is empty".to_string());
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> std::result::Result<SocketAddr, String> {
        self.bind
            .parse()
            .map_err(|e| format!("bad bind address '{}': {}", self.bind, e))
    }

    /// Records the address the endpoint actually listens on.
    pub fn set_bound(&mut self, addr: SocketAddr) {
        self.bind = addr.to_string();
    }

    /// Whether the endpoint port is known, i.e. not still a request for any port.
    pub fn is_bound(&self) -> bool {
        matches!(self.bind_addr(), Ok(addr) if addr.port() != 0)
    }

    /// Address handed to the driver through `SESSION_URL`.
    pub fn session_url(&self) -> String {
        match self.bind_addr() {
            Ok(addr) if addr.ip().is_unspecified() => format!("http://127.0.0.1:{}", addr.port()),
            Ok(addr) => format!("http://{}", addr),
            Err(_) => format!("http://{}", self.bind),
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
