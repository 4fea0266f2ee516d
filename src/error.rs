use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream rate limited the request")]
    Throttled,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Invalid response format: {0}")]
    Malformed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl TrackerError {
    /// Throttling gets special handling in the loops: back off and skip the
    /// current unit of work instead of retrying in place.
    pub fn is_throttled(&self) -> bool {
        matches!(self, TrackerError::Throttled)
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
