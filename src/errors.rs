// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Grader '{grader}' is broken: {source}")]
    ModuleDefect {
        grader: String,
        #[source]
        source: ModuleError,
    },

    #[error("Sandbox failure: {0}")]
    ServiceDefect(String),
}

impl GradeError {
    pub fn module(grader: &str, source: ModuleError) -> Self {
        GradeError::ModuleDefect {
            grader: grader.to_string(),
            source,
        }
    }

    /// Short label used in logs and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            GradeError::ModuleDefect { .. } => "module_defect",
            GradeError::Config(_) | GradeError::JsonParse(_) => "config_error",
            _ => "service_defect",
        }
    }
}

/// A failure raised by a grader module operation.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("{0}() is not provided by this grader")]
    Missing(&'static str),

    #[error("{op}() failed: {reason}")]
    Failed { op: &'static str, reason: String },

    #[error("invalid definition: {0}")]
    Definition(String),
}

impl ModuleError {
    pub fn failed(op: &'static str, reason: impl Into<String>) -> Self {
        ModuleError::Failed {
            op,
            reason: reason.into(),
        }
    }
}

/// How a submission ended a batch run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFault {
    Timeout,
    ResourceExceeded,
    RuntimeError,
}

impl SubmissionFault {
    pub fn message(&self) -> &'static str {
        match self {
            SubmissionFault::Timeout => "Timeout",
            SubmissionFault::ResourceExceeded => "Resource error",
            SubmissionFault::RuntimeError => "Runtime error",
        }
    }
}

/// Rejections produced by the session endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed call '{0}'")]
    Malformed(String),

    #[error("wrong clue")]
    Mismatch,

    #[error("attempt already in progress")]
    OutOfOrder,

    #[error("no attempt started")]
    NotStarted,

    #[error("attempt already settled")]
    AlreadySettled,

    #[error("no round is active")]
    NoActiveRound,
}

pub type Result<T> = std::result::Result<T, GradeError>;
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;
