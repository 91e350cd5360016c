//! Buffer manager errors.

use federa_common::error::FederaError;
use federa_common::types::BufferId;
use thiserror::Error;

/// Result type for buffer manager operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer manager operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum BufferError {
    /// Buffer not found (never created, or already removed).
    #[error("buffer {buffer_id} not found")]
    NotFound { buffer_id: BufferId },

    /// The configured row budget would be exceeded.
    #[error("row budget exhausted: {requested} rows requested, {available} available")]
    Exhausted { requested: usize, available: usize },

    /// A row does not match the buffer's schema arity.
    #[error("buffer {buffer_id} expects {expected} columns, got {actual}")]
    ArityMismatch {
        buffer_id: BufferId,
        expected: usize,
        actual: usize,
    },

    /// Row number outside the buffer.
    #[error("row {row} is outside buffer {buffer_id} of {row_count} rows")]
    RowOutOfRange {
        buffer_id: BufferId,
        row: usize,
        row_count: usize,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a buffer-not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<BufferError> for FederaError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::NotFound { buffer_id } => FederaError::BufferNotFound { buffer_id },
            BufferError::Exhausted { .. } => FederaError::resource_exhausted(err.to_string()),
            BufferError::ArityMismatch { .. } | BufferError::RowOutOfRange { .. } => {
                FederaError::invariant(err.to_string())
            }
            BufferError::Config { message } => FederaError::config(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_families() {
        let err: FederaError = BufferError::NotFound {
            buffer_id: BufferId::new(9),
        }
        .into();
        assert!(err.is_buffer_not_found());

        let err: FederaError = BufferError::Exhausted {
            requested: 10,
            available: 2,
        }
        .into();
        assert!(err.is_component());
        assert!(err.to_string().contains("10 rows requested"));
    }
}
