use thiserror::Error;

/// Failure taxonomy for the upstream feed client.
///
/// `CircuitOpen` is the expected fail-fast path and is never logged as an
/// error; everything else is retried inside one fetch before surfacing.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("circuit breaker open, skipping upstream call")]
    CircuitOpen,

    #[error("upstream request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to parse feed payload: {0}")]
    Parse(String),

    #[error("feed payload missing data field")]
    MissingData,
}

impl FeedError {
    /// Coarse classification used only for logging; every class counts
    /// identically toward the circuit breaker.
    pub fn class(&self) -> &'static str {
        match self {
            FeedError::CircuitOpen => "circuit_open",
            FeedError::Timeout => "timeout",
            FeedError::Network(_) => "network",
            FeedError::Status(status) if status.is_client_error() => "client",
            FeedError::Status(_) => "server",
            FeedError::Parse(_) | FeedError::MissingData => "parse",
        }
    }
}
