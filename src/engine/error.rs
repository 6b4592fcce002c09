use thiserror::Error;

use crate::store::RepositoryError;

/// Every public operation fails with exactly one of these. The message is the
/// reason shown to the caller.
#[derive(Debug, Error)]
pub enum AvailabilityError {
    /// Bad input; never retried.
    #[error("{0}")]
    Validation(String),

    /// Duplicate slot, booking overlap, existing blackout. The caller adjusts and retries.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl AvailabilityError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AvailabilityError::Validation(_) => "validation",
            AvailabilityError::Conflict(_) => "conflict",
            AvailabilityError::NotFound(_) => "not_found",
            AvailabilityError::Repository(_) => "repository",
        }
    }
}
