//! Error kinds surfaced by the judging pipeline.

use thiserror::Error;

pub type Result<T, E = JudgeError> = std::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JudgeError {
    /// The judging page could not be fetched.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The page did not have the structure we expect.
    #[error("parse failed: {0}")]
    Parse(String),
    /// The language model call failed or gave an unusable reply.
    #[error("AI rating failed: {0}")]
    AiGeneration(String),
    /// An internal invariant was violated.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The ratings POST failed or was rejected.
    #[error("submit failed: {0}")]
    Submit(String),
    /// The session cookies are no longer accepted.
    #[error("session expired: {0}")]
    AuthExpired(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(String),
}

impl JudgeError {
    /// Short name of the error kind, used in per-item reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            JudgeError::Fetch(_) => "FetchError",
            JudgeError::Parse(_) => "ParseError",
            JudgeError::AiGeneration(_) => "AIGenerationError",
            JudgeError::InvalidState(_) => "InvalidStateError",
            JudgeError::Submit(_) => "SubmitError",
            JudgeError::AuthExpired(_) => "AuthExpiredError",
            JudgeError::Config(_) => "ConfigError",
            JudgeError::Io(_) => "IoError",
        }
    }

    /// Whether every later request in the same run would fail the same way.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, JudgeError::AuthExpired(_))
    }
}
