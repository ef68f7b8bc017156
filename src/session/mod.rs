// src/session/mod.rs
//! Interactive grading: the student's driver talks to a small HTTP endpoint
//! while a supervisor polls it, enforces deadlines, and scores each run.

pub mod client;
pub mod endpoint;
pub mod settings;
pub mod state;
pub mod supervisor;

pub use settings::{Scoring, SessionSettings};
pub use state::{Attempt, CallReply, SessionContext, SessionPhase};
pub use supervisor::{AttemptOutcome, AttemptRecord, Supervisor};
