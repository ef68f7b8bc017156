// src/session/supervisor.rs

use std::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::errors::{GradeError, Result};
use crate::models::Reply;
use crate::session::client::ClientProcess;
use crate::session::settings::{Scoring, SessionSettings};
use crate::session::state::SessionContext;

/// How one driver run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Reached the final station
    Solved,
    /// Sent a wrong or malformed call
    Invalidated,
    /// Exited cleanly with stations still pending
    Withdrawn,
    /// Exited cleanly without ever calling start
    NotStarted,
    Timeout,
    RuntimeError(Option<i32>),
}

impl AttemptOutcome {
    /// Result line for this attempt. All-or-nothing scoring never pays for a
    /// partial run, so its failure lines do not mention one.
    pub fn describe(&self, scoring: Scoring) -> String {
        let partial = match scoring {
            Scoring::Fractional => " (partial run possible)",
            Scoring::AllOrNothing => "",
        };
        match self {
            AttemptOutcome::Solved => "Normal run (all stations passed)".to_string(),
            AttemptOutcome::Invalidated => "Normal run (wrong or malformed call)".to_string(),
            AttemptOutcome::Withdrawn => "Normal run (stopped early)".to_string(),
            AttemptOutcome::NotStarted => "Session wasn't started".to_string(),
            AttemptOutcome::Timeout => format!("Timeout{}", partial),
            AttemptOutcome::RuntimeError(Some(code)) => {
                format!("Runtime error, exit code {}{}", code, partial)
            }
            AttemptOutcome::RuntimeError(None) => {
                format!("Runtime error, killed by signal{}", partial)
            }
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, AttemptOutcome::Timeout | AttemptOutcome::RuntimeError(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub outcome: AttemptOutcome,
    pub completed: u32,
    pub total: u32,
    pub rate: f64,
}

impl AttemptRecord {
    pub fn new(outcome: AttemptOutcome, completed: u32, total: u32, scoring: Scoring) -> Self {
        let rate = match scoring {
            Scoring::Fractional => f64::from(completed) / f64::from(total),
            Scoring::AllOrNothing => {
                if completed >= total && !outcome.is_failure() { 1.0 } else { 0.0 }
            }
        };
        Self {
            outcome,
            completed,
            total,
            rate,
        }
    }
}

/// Drives one interactive session: keeps exactly one student driver alive,
/// settles each of its runs into an [`AttemptRecord`], and stops once the
/// configured number of attempts is in.
pub struct Supervisor {
    ctx: SessionContext,
    settings: SessionSettings,
    history: Vec<AttemptRecord>,
}

impl Supervisor {
    pub fn new(ctx: SessionContext, settings: SessionSettings) -> Self {
        Self {
            ctx,
            settings,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    pub fn is_done(&self) -> bool {
        self.history.len() >= self.settings.sample_size
    }

    /// One pass of the driving loop. State changes happen under a single
    /// lock; only output collection from a finished driver runs after it.
    pub async fn tick(&mut self) -> Result<Option<AttemptRecord>> {
        let (record, finished) = {
            let mut state = self.ctx.lock().await;

            if !state.has_client() {
                if !self.settings.is_bound() {
                    return Err(GradeError::ServiceDefect(format!(
                        "session endpoint address {} is not resolved",
                        self.settings.bind
                    )));
                }
                let client = ClientProcess::spawn(
                    &self.settings.client_command,
                    self.settings.attempt_timeout(),
                    &self.settings.session_url(),
                )
                .map_err(|e| GradeError::ServiceDefect(format!("cannot start the driver: {}", e)))?;
                log::debug!("Driver started (pid {:?})", client.id());
                state.attach(client);
                return Ok(None);
            }

            let Some(outcome) = state.poll_client(Instant::now())? else {
                return Ok(None);
            };
            let (attempt, finished) = state.close_round();
            let record = AttemptRecord::new(
                outcome,
                attempt.completed(),
                state.stations(),
                self.settings.scoring,
            );
            (record, finished)
        };

        if let Some(client) = finished {
            let output = client.collect(self.settings.kill_grace()).await;
            log::debug!("Driver stdout: {}", output.stdout.trim_end());
            if !output.stderr.is_empty() {
                log::debug!("Driver stderr: {}", output.stderr.trim_end());
            }
        }

        log::info!(
            "Attempt {}/{}: {} ({}/{} stations)",
            self.history.len() + 1,
            self.settings.sample_size,
            record.outcome.describe(self.settings.scoring),
            record.completed,
            record.total
        );
        self.history.push(record.clone());
        Ok(Some(record))
    }

    /// Runs ticks until the sample is complete, then scores it.
    pub async fn run(mut self) -> Result<Reply> {
        let mut ticker = tokio::time::interval(self.settings.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_done() {
            ticker.tick().await;
            self.tick().await?;
        }

        self.ctx.lock().await.finish();
        Ok(self.aggregate())
    }

    pub fn aggregate(&self) -> Reply {
        let score = match self.settings.scoring {
            Scoring::Fractional if !self.history.is_empty() => {
                self.history.iter().map(|r| r.rate).sum::<f64>() / self.history.len() as f64
            }
            Scoring::Fractional => 0.0,
            Scoring::AllOrNothing => {
                let all = !self.history.is_empty() && self.history.iter().all(|r| r.rate >= 1.0);
                if all { 1.0 } else { 0.0 }
            }
        };

        let mut msg = vec!["Results:".to_string()];
        let scoring = self.settings.scoring;
        msg.extend(self.history.iter().map(|r| format!("- {}", r.outcome.describe(scoring))));
        Reply::new(score, msg.join("\n"))
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::session::state::{Attempt, CallReply, SessionPhase};
    use std::time::Duration;

    fn session_settings(command: &str, timeout_ms: u64) -> SessionSettings {
        SessionSettings {
            stations: 3,
            sample_size: 1,
            attempt_timeout_ms: timeout_ms,
            tick_ms: 5,
            kill_grace_ms: 100,
            client_command: command.to_string(),
            bind: "127.0.0.1:18099".to_string(),
            seed: Some(3),
            ..Default::default()
        }
    }

    /// Ticks until a round settles.
    async fn settle(supervisor: &mut Supervisor) -> AttemptRecord {
        for _ in 0..2000 {
            if let Some(record) = supervisor.tick().await.unwrap() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("round never settled");
    }

    async fn call(ctx: &SessionContext, token: &str) -> CallReply {
        ctx.handle_call(token).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_run_is_settled_and_driver_killed() {
        let settings = session_settings("sleep 30", 5000);
        let ctx = SessionContext::new(&settings);
        let mut supervisor = Supervisor::new(ctx.clone(), settings);

        assert!(supervisor.tick().await.unwrap().is_none());
        assert_eq!(ctx.lock().await.phase(), SessionPhase::AwaitProcess);

        let CallReply::Clue(mut clue) = call(&ctx, "/start").await else {
            panic!("start must return a clue");
        };
        assert_eq!(ctx.lock().await.phase(), SessionPhase::RoundActive);
        for _ in 0..2 {
            let CallReply::Clue(next) = call(&ctx, &format!("/{}", clue)).await else {
                panic!("intermediate stations return clues");
            };
            clue = next;
        }
        assert_eq!(call(&ctx, &format!("/{}", clue)).await, CallReply::Accepted);
        assert_eq!(ctx.lock().await.phase(), SessionPhase::RoundSettled);

        let started = Instant::now();
        let record = settle(&mut supervisor).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(record.outcome, AttemptOutcome::Solved);
        assert_eq!(record.rate, 1.0);
        assert_eq!(ctx.lock().await.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_silent_driver_times_out_with_zero() {
        let settings = session_settings("sleep 30", 200);
        let ctx = SessionContext::new(&settings);
        let mut supervisor = Supervisor::new(ctx.clone(), settings);

        supervisor.tick().await.unwrap();
        let CallReply::Clue(clue) = call(&ctx, "/start").await else {
            panic!("start must return a clue");
        };
        assert!(clue <= 1000);

        let record = settle(&mut supervisor).await;
        assert_eq!(record.outcome, AttemptOutcome::Timeout);
        assert_eq!(record.completed, 0);
        assert_eq!(record.rate, 0.0);
    }

    #[tokio::test]
    async fn test_clean_exit_after_partial_progress() {
        let settings = session_settings("sleep 0.5", 5000);
        let ctx = SessionContext::new(&settings);
        let mut supervisor = Supervisor::new(ctx.clone(), settings);

        supervisor.tick().await.unwrap();
        let CallReply::Clue(clue) = call(&ctx, "/start").await else {
            panic!("start must return a clue");
        };
        call(&ctx, &format!("/{}", clue)).await;
        assert!(matches!(ctx.lock().await.attempt(), Attempt::Active { completed: 1, .. }));

        let record = settle(&mut supervisor).await;
        assert_eq!(record.outcome, AttemptOutcome::Withdrawn);
        assert!((record.rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_runtime_error_and_not_started() {
        let settings = session_settings("sh -c 'exit 3'", 5000);
        let ctx = SessionContext::new(&settings);
        let mut supervisor = Supervisor::new(ctx.clone(), settings);
        let record = settle(&mut supervisor).await;
        assert_eq!(record.outcome, AttemptOutcome::RuntimeError(Some(3)));
        assert_eq!(record.rate, 0.0);

        let settings = session_settings("true", 5000);
        let ctx = SessionContext::new(&settings);
        let mut supervisor = Supervisor::new(ctx.clone(), settings);
        let record = settle(&mut supervisor).await;
        assert_eq!(record.outcome, AttemptOutcome::NotStarted);
        assert_eq!(record.rate, 0.0);
    }

    #[tokio::test]
    async fn test_run_aggregates_exactly_sample_size() {
        let mut settings = session_settings("true", 5000);
        settings.sample_size = 4;
        let ctx = SessionContext::new(&settings);
        let supervisor = Supervisor::new(ctx.clone(), settings);

        let reply = supervisor.run().await.unwrap();

        assert_eq!(reply.score, 0.0);
        assert_eq!(reply.msg.lines().count(), 5);
        assert_eq!(reply.msg.matches("Session wasn't started").count(), 4);
        assert_eq!(ctx.lock().await.phase(), SessionPhase::Done);
    }

    #[tokio::test]
    async fn test_missing_driver_is_a_runtime_error() {
        let mut settings = session_settings("true", 5000);
        settings.client_command = "/definitely/not/here".to_string();
        let ctx = SessionContext::new(&settings);
        let mut supervisor = Supervisor::new(ctx, settings);

        // `sh` itself starts fine; the exec fails and surfaces as exit 127.
        let record = settle(&mut supervisor).await;
        assert_eq!(record.outcome, AttemptOutcome::RuntimeError(Some(127)));
    }
}
