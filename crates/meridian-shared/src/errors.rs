//! # Error Taxonomy
//!
//! Unified error kinds shared across the orchestration core, matching the
//! taxonomy every collaborator (CLI, webhooks, push clients) needs to branch
//! on: validation vs. conflict vs. transient-db vs. fatal.

use thiserror::Error;

/// Core operation result type.
pub type MeridianResult<T> = Result<T, MeridianError>;

/// Unified error kind for the orchestration core.
///
/// Each variant corresponds to one kind in the error taxonomy: callers branch
/// on the variant, not the message, to decide whether to retry, surface a
/// field-level validation error, or treat the failure as fatal.
#[derive(Debug, Error)]
pub enum MeridianError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited, retry after {retry_after:.3}s")]
    RateLimited { retry_after: f64 },

    #[error("transient database error: {0}")]
    TransientDb(String),

    #[error("fatal database error: {0}")]
    FatalDb(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MeridianError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Map a `sqlx::Error` to a `TRANSIENT_DB` or `FATAL_DB` kind the same
    /// way `spec.md` §4.1 requires: timeouts and connection loss are
    /// transient, everything else (protocol violations, integrity errors) is
    /// fatal and not retried.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::TransientDb(err.to_string())
            }
            _ => Self::FatalDb(err.to_string()),
        }
    }

    /// Whether a caller may retry the whole operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientDb(_) | Self::RateLimited { .. })
    }
}

impl From<sqlx::Error> for MeridianError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_entity_and_id() {
        let err = MeridianError::not_found("task", "abc-123");
        assert_eq!(format!("{err}"), "task not found: abc-123");
    }

    #[test]
    fn transient_db_is_retryable() {
        let err = MeridianError::TransientDb("timeout".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn rate_limited_is_retryable() {
        let err = MeridianError::RateLimited { retry_after: 0.01 };
        assert!(err.is_retryable());
    }

    #[test]
    fn fatal_db_is_not_retryable() {
        let err = MeridianError::FatalDb("unique constraint".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflict_is_not_retryable() {
        let err = MeridianError::conflict("duplicate edge");
        assert!(!err.is_retryable());
    }

    #[test]
    fn pool_timeout_maps_to_transient() {
        let err = MeridianError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, MeridianError::TransientDb(_)));
    }

    #[test]
    fn row_not_found_maps_to_fatal() {
        let err = MeridianError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err, MeridianError::FatalDb(_)));
    }
}
