use serde::{Deserialize, Serialize};

/// Google-style status strings, preserved for client compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStatus {
    Unauthenticated,
    InvalidArgument,
    PermissionDenied,
    ResourceExhausted,
    Internal,
    Unavailable,
}

/// The error envelope emitted to clients:
/// `{"error":{"code":...,"message":"...","status":"..."}}`.
///
/// Serialization is deterministic so the envelope is byte-identical between a
/// first-attempt failure and a replayed failure of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub status: ErrorStatus,
}

impl ErrorEnvelope {
    pub fn new(code: u16, status: ErrorStatus, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                status,
            },
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(401, ErrorStatus::Unauthenticated, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(400, ErrorStatus::InvalidArgument, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(403, ErrorStatus::PermissionDenied, message)
    }

    pub fn resource_exhausted(code: u16, message: impl Into<String>) -> Self {
        Self::new(code, ErrorStatus::ResourceExhausted, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, ErrorStatus::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, ErrorStatus::Internal, message)
    }

    /// The pool-exhausted envelope paired with WS close code 4290.
    pub fn pool_busy() -> Self {
        Self::resource_exhausted(4290, "try again later")
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("error envelope serializes")
    }
}
