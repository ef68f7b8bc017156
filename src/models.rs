// src/models.rs
use crate::errors::{GradeError, Result};
use serde::{Deserialize, Serialize};

pub const TECH_DIFF_MSG: &str = "Oops.\nSomething went wrong on our side and we are most likely \
already working on it.\nPlease report your submission number to the address given in the course \
and hold off on further submissions until it is announced fixed.";

/// One submission as delivered by the queue.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct XqueueItem {
    pub xqueue_body: String,
    #[serde(default)]
    pub xqueue_files: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct XqueueBody {
    student_response: String,
    grader_payload: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Batch,
    #[serde(alias = "session")]
    Interactive,
}

/// Grader configuration carried by the submission.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GraderPayload {
    /// Grader reference, relative to the grader root
    pub grader: String,

    #[serde(default)]
    pub mode: Mode,

    /// Number of test cases a single-case suite is repeated to
    #[serde(default)]
    pub sample_size: Option<usize>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct GradingRequest {
    pub submission: String,
    pub payload: GraderPayload,
}

impl GradingRequest {
    pub fn mode(&self) -> Mode {
        self.payload.mode
    }

    pub fn grader(&self) -> &str {
        &self.payload.grader
    }
}

impl TryFrom<&XqueueItem> for GradingRequest {
    type Error = GradeError;

    fn try_from(item: &XqueueItem) -> Result<Self> {
        let body: XqueueBody = serde_json::from_str(&item.xqueue_body)?;
        let payload: GraderPayload = serde_json::from_str(&body.grader_payload).map_err(|e| {
            log::debug!("error parsing: '{}' -- {}", body.grader_payload, e);
            GradeError::Config(format!("bad grader payload: {}", e))
        })?;
        log::debug!("Processing submission, grader payload: {}", body.grader_payload);

        Ok(GradingRequest {
            submission: body.student_response,
            payload,
        })
    }
}

/// Final result handed back to the queue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reply {
    pub score: f64,
    pub msg: String,
}

impl Reply {
    pub fn new(score: f64, msg: impl Into<String>) -> Self {
        Self {
            score,
            msg: msg.into(),
        }
    }

    pub fn zero(msg: impl Into<String>) -> Self {
        Self::new(0.0, msg)
    }

    pub fn technical_difficulties() -> Self {
        Self::zero(TECH_DIFF_MSG)
    }

    /// Wraps a bare score with the stock feedback line.
    pub fn with_default_msg(score: f64) -> Self {
        Self::new(score, default_msg(score))
    }
}

pub fn default_msg(score: f64) -> &'static str {
    if score == 0.0 {
        "Something is incorrect, try again!"
    } else if score < 0.75 {
        "Not bad, but you can do better!"
    } else {
        "Good job!"
    }
}
