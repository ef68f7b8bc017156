// src/session/state.rs

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};

use crate::errors::ProtocolError;
use crate::session::client::ClientProcess;
use crate::session::settings::SessionSettings;
use crate::session::supervisor::AttemptOutcome;

/// Progress of the attempt made by the current driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attempt {
    #[default]
    Idle,
    Active { completed: u32, clue: u32 },
    Solved { completed: u32 },
    Invalidated { completed: u32 },
}

impl Attempt {
    pub fn completed(&self) -> u32 {
        match self {
            Attempt::Idle => 0,
            Attempt::Active { completed, .. }
            | Attempt::Solved { completed }
            | Attempt::Invalidated { completed } => *completed,
        }
    }

    pub fn expected_clue(&self) -> Option<u32> {
        match self {
            Attempt::Active { clue, .. } => Some(*clue),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Attempt::Solved { .. } | Attempt::Invalidated { .. })
    }

    /// Outcome when the driver exits with status 0.
    fn clean_exit(&self) -> AttemptOutcome {
        match self {
            Attempt::Idle => AttemptOutcome::NotStarted,
            Attempt::Active { .. } => AttemptOutcome::Withdrawn,
            Attempt::Solved { .. } => AttemptOutcome::Solved,
            Attempt::Invalidated { .. } => AttemptOutcome::Invalidated,
        }
    }
}

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitProcess,
    RoundActive,
    RoundSettled,
    Done,
}

/// Successful endpoint answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallReply {
    Clue(u32),
    Accepted,
}

/// State shared by the endpoint and the driving loop.
pub struct SessionState {
    stations: u32,
    clue_max: u32,
    start_token: String,
    rng: StdRng,
    attempt: Attempt,
    round_open: bool,
    done: bool,
    client: Option<ClientProcess>,
}

impl SessionState {
    pub fn new(settings: &SessionSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            stations: settings.stations,
            clue_max: settings.clue_max,
            start_token: settings.start_token.to_ascii_lowercase(),
            rng,
            attempt: Attempt::Idle,
            round_open: false,
            done: false,
            client: None,
        }
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn stations(&self) -> u32 {
        self.stations
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.done {
            return SessionPhase::Done;
        }
        match (&self.client, self.attempt) {
            (None, _) => SessionPhase::Idle,
            (Some(_), Attempt::Idle) => SessionPhase::AwaitProcess,
            (Some(_), Attempt::Active { .. }) => SessionPhase::RoundActive,
            (Some(_), _) => SessionPhase::RoundSettled,
        }
    }

    /// Accepts endpoint calls for a fresh attempt.
    pub fn open_round(&mut self) {
        self.attempt = Attempt::Idle;
        self.round_open = true;
    }

    /// Starts a round with the given driver. Never replaces a live one.
    pub(crate) fn attach(&mut self, client: ClientProcess) {
        debug_assert!(self.client.is_none(), "a driver is already running");
        self.client = Some(client);
        self.open_round();
    }

    /// Ends the round, handing back its attempt and driver.
    pub(crate) fn close_round(&mut self) -> (Attempt, Option<ClientProcess>) {
        self.round_open = false;
        let attempt = std::mem::take(&mut self.attempt);
        (attempt, self.client.take())
    }

    /// Checks the driver once without waiting on it. Returns how the round
    /// ended, if it did.
    pub(crate) fn poll_client(&mut self, now: Instant) -> io::Result<Option<AttemptOutcome>> {
        let Some(client) = self.client.as_mut() else {
            return Ok(None);
        };

        if let Some(status) = client.poll()? {
            return Ok(Some(if status.success() {
                self.attempt.clean_exit()
            } else {
                AttemptOutcome::RuntimeError(status.code())
            }));
        }

        // The attempt can no longer change; no reason to let the driver linger.
        if self.attempt.is_settled() {
            client.kill();
            return Ok(Some(self.attempt.clean_exit()));
        }

        if client.overdue(now) {
            client.kill();
            return Ok(Some(AttemptOutcome::Timeout));
        }

        Ok(None)
    }

    /// Stops accepting calls and kills any driver still running.
    pub fn finish(&mut self) {
        self.done = true;
        self.round_open = false;
        if let Some(client) = self.client.as_mut() {
            client.kill();
        }
        self.client = None;
    }

    fn next_clue(&mut self) -> u32 {
        self.rng.gen_range(0..=self.clue_max)
    }

    fn invalidate(&mut self) {
        if let Attempt::Active { completed, .. } = self.attempt {
            self.attempt = Attempt::Invalidated { completed };
        }
    }

    /// Serves one endpoint call. `token` is the request path.
    pub fn handle_call(&mut self, token: &str) -> Result<CallReply, ProtocolError> {
        if !self.round_open {
            return Err(ProtocolError::NoActiveRound);
        }
        let token = token.trim_start_matches('/').to_ascii_lowercase();

        if token == self.start_token {
            return match self.attempt {
                Attempt::Idle => {
                    let clue = self.next_clue();
                    self.attempt = Attempt::Active { completed: 0, clue };
                    Ok(CallReply::Clue(clue))
                }
                Attempt::Active { .. } => {
                    self.invalidate();
                    Err(ProtocolError::OutOfOrder)
                }
                _ => Err(ProtocolError::AlreadySettled),
            };
        }

        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            return match self.attempt {
                Attempt::Active { completed, clue } => {
                    // Too many digits for a u64 cannot be the clue either.
                    if token.parse::<u64>().ok() != Some(u64::from(clue)) {
                        self.invalidate();
                        return Err(ProtocolError::Mismatch);
                    }
                    let completed = completed + 1;
                    if completed >= self.stations {
                        self.attempt = Attempt::Solved { completed };
                        Ok(CallReply::Accepted)
                    } else {
                        let clue = self.next_clue();
                        self.attempt = Attempt::Active { completed, clue };
                        Ok(CallReply::Clue(clue))
                    }
                }
                Attempt::Idle => Err(ProtocolError::NotStarted),
                _ => Err(ProtocolError::AlreadySettled),
            };
        }

        self.invalidate();
        Err(ProtocolError::Malformed(token))
    }
}

/// Handle to the session state, shared by the endpoint and the supervisor.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionContext {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState::new(settings))),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().await
    }

    pub async fn handle_call(&self, token: &str) -> Result<CallReply, ProtocolError> {
        self.lock().await.handle_call(token)
    }
}
