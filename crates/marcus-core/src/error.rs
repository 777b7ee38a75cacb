use serde::Serialize;
use thiserror::Error;

/// The error kinds the Coordinator API can return to a caller.
///
/// Every variant carries enough information to build the `{kind, message,
/// retriable, details?}` response body the transport layer sends back
/// verbatim.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("external failure: {message}")]
    ExternalFailure { message: String },

    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn external_failure(message: impl Into<String>) -> Self {
        Self::ExternalFailure {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The stable machine-readable kind string, used verbatim in the
    /// transport-layer error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ExternalFailure { .. } => "external_failure",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether a caller should expect a retry to eventually succeed.
    pub fn retriable(&self) -> bool {
        matches!(self, Self::ExternalFailure { .. } | Self::RateLimited { .. })
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind().to_owned(),
            message: self.to_string(),
            retriable: self.retriable(),
            details: match self {
                Self::RateLimited { retry_after_seconds } => {
                    Some(serde_json::json!({ "retry_after_seconds": retry_after_seconds }))
                }
                _ => None,
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal { message: err.to_string() }
    }
}

impl From<marcus_db::PersistenceError> for CoreError {
    fn from(err: marcus_db::PersistenceError) -> Self {
        match err {
            marcus_db::PersistenceError::Backend(msg) => CoreError::ExternalFailure { message: msg },
            other => CoreError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Wire shape of a Coordinator API failure, per spec.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
    pub retriable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type Result<T> = std::result::Result<T, CoreError>;
