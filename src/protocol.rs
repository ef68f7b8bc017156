// src/protocol.rs

use async_trait::async_trait;

use crate::errors::{ModuleError, ModuleResult};

/// One unit of a batch suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestCase {
    /// The grader must solve the prompt itself before checking.
    Bare(String),
    /// The expected answer (or whatever `check` needs) ships with the prompt.
    Clued { prompt: String, clue: String },
}

impl TestCase {
    pub fn prompt(&self) -> &str {
        match self {
            TestCase::Bare(prompt) => prompt,
            TestCase::Clued { prompt, .. } => prompt,
        }
    }
}

/// Score of a single test.
#[derive(Debug, Clone, PartialEq)]
pub enum Rate {
    Scalar(f64),
    /// A message replaces the run's final message. A `None` value aborts
    /// the whole run with zero.
    Noted(Option<f64>, String),
}

impl Rate {
    pub fn pass(ok: bool) -> Self {
        Rate::Scalar(if ok { 1.0 } else { 0.0 })
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Rate::Scalar(v) => Some(*v),
            Rate::Noted(v, _) => *v,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Rate::Scalar(_) => None,
            Rate::Noted(_, msg) => Some(msg),
        }
    }
}

/// What `evaluate` hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Score(f64),
    Scored(f64, String),
}

impl Verdict {
    pub fn score(&self) -> f64 {
        match self {
            Verdict::Score(s) | Verdict::Scored(s, _) => *s,
        }
    }
}

/// Mean of all rate values; the default aggregation.
pub fn mean_of(rates: &[Rate]) -> ModuleResult<f64> {
    if rates.is_empty() {
        return Err(ModuleError::failed("evaluate", "no rates to aggregate"));
    }
    let total: f64 = rates.iter().filter_map(Rate::value).sum();
    Ok(total / rates.len() as f64)
}

/// The contract every grading module implements. A module is built fresh
/// for each request and holds no state between them.
#[async_trait]
pub trait GraderModule: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self) -> ModuleResult<Vec<TestCase>>;

    /// Reference answer for a bare prompt. Runs outside the sandbox.
    async fn solve(&self, _prompt: &str) -> ModuleResult<String> {
        Err(ModuleError::Missing("solve"))
    }

    fn check(&self, output: &str, expected: &str) -> ModuleResult<Rate>;

    fn evaluate(&self, rates: &[Rate]) -> ModuleResult<Verdict> {
        mean_of(rates).map(Verdict::Score)
    }

    fn post_process(&self, stdout: &[u8]) -> ModuleResult<String> {
        Ok(String::from_utf8_lossy(stdout).trim().to_string())
    }
}
