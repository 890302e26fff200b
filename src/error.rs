//! Shared error taxonomy.
//!
//! Every component surfaces one of these kinds rather than its own ad-hoc
//! error type, so the queue and CLI can make retry/exit-code decisions
//! without knowing which component raised the error.

use thiserror::Error;

/// A single error taxonomy shared across the repository, archive client,
/// queue, search index, and connector.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    #[error("permanent upstream error: {0}")]
    PermanentUpstream(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Exit code used by the CLI's process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::NotFound(_) => 3,
            Self::Conflict(_) => 4,
            Self::TransientUpstream(_) | Self::PermanentUpstream(_) => 5,
            Self::ResourceExhausted(_) => 1,
            Self::CorruptData(_) => 1,
            Self::Internal(_) => 1,
        }
    }

    /// Whether the queue's retry machinery should absorb this error rather
    /// than propagate it to a terminal task status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream(_))
    }
}

impl From<diesel::result::Error> for PipelineError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound("row not found".into()),
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => Self::Conflict(info.message().to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(e.to_string()),
            std::io::ErrorKind::OutOfMemory => Self::ResourceExhausted(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_cover_every_variant_class() {
        assert_eq!(PipelineError::Validation("x".into()).exit_code(), 2);
        assert_eq!(PipelineError::NotFound("x".into()).exit_code(), 3);
        assert_eq!(PipelineError::Conflict("x".into()).exit_code(), 4);
        assert_eq!(PipelineError::TransientUpstream("x".into()).exit_code(), 5);
    }

    #[test]
    fn only_transient_upstream_is_retryable() {
        assert!(PipelineError::TransientUpstream("x".into()).is_retryable());
        assert!(!PipelineError::CorruptData("x".into()).is_retryable());
        assert!(!PipelineError::PermanentUpstream("x".into()).is_retryable());
    }
}
