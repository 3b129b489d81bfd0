use serde::{Deserialize, Serialize};

/// Error kinds as classified by the gateway. Lower layers return these;
/// only the turn engine maps them to user-visible envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimited,
    ContinuationUnavailable,
    UpstreamTransient,
    UpstreamErrorEvent,
    PoolBusy,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ContinuationUnavailable => "continuation_unavailable",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::UpstreamErrorEvent => "upstream_error_event",
            ErrorKind::PoolBusy => "pool_busy",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dial failures. A failed dial leaves no partial state behind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DialError {
    #[error("upstream rejected credentials: {0}")]
    Auth(String),
    #[error("upstream rate limited: {0}")]
    RateLimited(String),
    #[error("network failure dialing upstream: {0}")]
    Network(String),
    #[error("upstream policy rejection: {0}")]
    Policy(String),
}

impl DialError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DialError::Auth(_) => ErrorKind::Auth,
            DialError::RateLimited(_) => ErrorKind::RateLimited,
            DialError::Network(_) => ErrorKind::UpstreamTransient,
            DialError::Policy(_) => ErrorKind::Auth,
        }
    }
}

/// A turn-level failure carrying its classification.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TurnError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<DialError> for TurnError {
    fn from(err: DialError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
