use thiserror::Error;

/// Error taxonomy for the ingestion core. Every upstream call site and every
/// job runner maps failures onto one of these kinds so callers can decide,
/// mechanically, whether to retry, skip, or abort the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("authentication rejected by upstream (401)")]
    Authentication,

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("upstream server error: {0}")]
    ServerError(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("emergency stop: observed daily remaining below threshold ({remaining} < {threshold})")]
    EmergencyStop { remaining: i64, threshold: i64 },

    #[error("dependency resolution failed: {0}")]
    Dependency(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            IngestError::Timeout(e.to_string())
        } else {
            IngestError::Transport(e.to_string())
        }
    }
}

impl From<redis::RedisError> for IngestError {
    fn from(e: redis::RedisError) -> Self {
        IngestError::Transport(e.to_string())
    }
}

impl IngestError {
    /// True for errors that should unwind a whole scheduler/live-loop run
    /// rather than just the current work item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Authentication | IngestError::EmergencyStop { .. })
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
