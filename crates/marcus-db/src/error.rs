use thiserror::Error;

/// Errors surfaced by the persistence layer.
///
/// Callers in `marcus-core` map these onto `CoreError::Internal` or
/// `CoreError::ExternalFailure` at the boundary; nothing in this crate
/// decides business-rule semantics.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
