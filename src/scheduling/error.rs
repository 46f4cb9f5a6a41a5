use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulingError {
    /// Bad input shape or range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Overlap or double booking.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Transition not allowed from the current status.
    #[error("invalid state: {0}")]
    State(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for SchedulingError {
    fn from(e: sqlx::Error) -> Self {
        SchedulingError::Storage(e.to_string())
    }
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;
