//! Execution error types.
//!
//! Errors fall into two families. Processing errors are caused by user
//! data or commands and abort the query with a descriptive message.
//! Component errors are internal failures and are fatal for the query.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::types::{BufferId, NodeId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Operation not supported.
    NotSupported = 0x0001,

    // Processing errors (0x0100 - 0x01FF)
    /// A command or node failed while processing user data.
    ProcessingFailed = 0x0100,
    /// An expression could not be evaluated.
    EvaluationFailed = 0x0101,
    /// A data source rejected or failed a command.
    DataSourceFailed = 0x0102,
    /// The plan is malformed.
    InvalidPlan = 0x0103,

    // Component errors (0x0200 - 0x02FF)
    /// Internal failure of an execution component.
    ComponentFailed = 0x0200,
    /// A buffer was not found by the buffer manager.
    BufferNotFound = 0x0201,
    /// An internal invariant was violated.
    InvariantViolation = 0x0202,
    /// A resource limit was exhausted.
    ResourceExhausted = 0x0203,
    /// The driver gave up re-polling a suspended plan.
    SuspensionLimit = 0x0204,

    // Configuration errors (0x0300 - 0x03FF)
    /// Configuration is invalid.
    InvalidConfig = 0x0300,
    /// Configuration file I/O failed.
    Io = 0x0301,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Processing",
            0x02 => "Component",
            0x03 => "Configuration",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The main error type for the Federa execution core.
///
/// # Example
///
/// ```rust
/// use federa_common::error::{FederaError, FederaResult};
///
/// fn divide(a: i64, b: i64) -> FederaResult<i64> {
///     if b == 0 {
///         return Err(FederaError::evaluation("division by zero"));
///     }
///     Ok(a / b)
/// }
///
/// let err = divide(1, 0).unwrap_err();
/// assert!(err.is_processing());
/// ```
#[derive(Debug, Error)]
pub enum FederaError {
    // ==========================================================================
    // Processing Errors
    // ==========================================================================
    /// A node failed while processing user data or a command.
    #[error("processing error: {message}")]
    Processing {
        /// Error message.
        message: String,
    },

    /// An expression could not be evaluated.
    #[error("evaluation error: {message}")]
    Evaluation {
        /// Error message.
        message: String,
    },

    /// A data source failed a submitted command.
    #[error("data source '{source_name}' failed: {message}")]
    DataSource {
        /// Name of the failing source.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// The plan handed to the execution core is malformed.
    #[error("invalid plan at node {node_id}: {message}")]
    InvalidPlan {
        /// Node where the problem was detected.
        node_id: NodeId,
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    // ==========================================================================
    // Component Errors
    // ==========================================================================
    /// Internal failure of an execution component.
    #[error("internal error: {message}")]
    Component {
        /// Error message.
        message: String,
    },

    /// A buffer was not found during a normal read or write.
    #[error("buffer {buffer_id} not found")]
    BufferNotFound {
        /// The missing buffer.
        buffer_id: BufferId,
    },

    /// An internal invariant was violated.
    #[error("invariant violated: {message}")]
    InvariantViolation {
        /// Error message.
        message: String,
    },

    /// A resource limit was exhausted.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Error message.
        message: String,
    },

    /// The driver stopped re-polling a plan that kept suspending.
    #[error("plan still suspended after {polls} polls")]
    SuspensionLimit {
        /// Number of consecutive suspended polls.
        polls: usize,
    },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// I/O error while reading or writing configuration.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },
}

impl FederaError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Processing { .. } => ErrorCode::ProcessingFailed,
            Self::Evaluation { .. } => ErrorCode::EvaluationFailed,
            Self::DataSource { .. } => ErrorCode::DataSourceFailed,
            Self::InvalidPlan { .. } => ErrorCode::InvalidPlan,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::Component { .. } => ErrorCode::ComponentFailed,
            Self::BufferNotFound { .. } => ErrorCode::BufferNotFound,
            Self::InvariantViolation { .. } => ErrorCode::InvariantViolation,
            Self::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            Self::SuspensionLimit { .. } => ErrorCode::SuspensionLimit,
            Self::Config { .. } => ErrorCode::InvalidConfig,
            Self::Io { .. } => ErrorCode::Io,
        }
    }

    /// Returns true if this error was caused by user data or commands.
    ///
    /// Processing errors are reported with their message intact.
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::Processing { .. }
                | Self::Evaluation { .. }
                | Self::DataSource { .. }
                | Self::InvalidPlan { .. }
                | Self::NotSupported { .. }
        )
    }

    /// Returns true if this error is an internal component failure.
    ///
    /// Component errors are fatal for the current query.
    #[must_use]
    pub const fn is_component(&self) -> bool {
        matches!(
            self,
            Self::Component { .. }
                | Self::BufferNotFound { .. }
                | Self::InvariantViolation { .. }
                | Self::ResourceExhausted { .. }
                | Self::SuspensionLimit { .. }
        )
    }

    /// Returns true if this error means a buffer was already gone.
    ///
    /// Only cleanup code may treat this condition as a no-op.
    #[must_use]
    pub const fn is_buffer_not_found(&self) -> bool {
        matches!(self, Self::BufferNotFound { .. })
    }

    /// Returns the message shown to the client.
    ///
    /// Component errors are reported generically.
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_component() {
            format!("internal failure ({})", self.code())
        } else {
            self.to_string()
        }
    }

    /// Creates a processing error.
    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    /// Creates an evaluation error.
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Creates a data source error.
    #[must_use]
    pub fn data_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid plan error.
    #[must_use]
    pub fn invalid_plan(node_id: NodeId, message: impl Into<String>) -> Self {
        Self::InvalidPlan {
            node_id,
            message: message.into(),
        }
    }

    /// Creates a component error.
    #[must_use]
    pub fn component(message: impl Into<String>) -> Self {
        Self::Component {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a resource exhaustion error.
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = FederaError::BufferNotFound {
            buffer_id: BufferId::new(3),
        };
        assert_eq!(err.code(), ErrorCode::BufferNotFound);
        assert_eq!(err.code().category(), "Component");
        assert_eq!(ErrorCode::EvaluationFailed.as_u16(), 0x0101);
    }

    #[test]
    fn test_error_display() {
        let err = FederaError::data_source("pg", "connection refused");
        assert_eq!(err.to_string(), "data source 'pg' failed: connection refused");
    }

    #[test]
    fn test_error_families() {
        assert!(FederaError::evaluation("x").is_processing());
        assert!(!FederaError::evaluation("x").is_component());
        assert!(FederaError::invariant("x").is_component());
        assert!(FederaError::SuspensionLimit { polls: 3 }.is_component());
        assert!(!FederaError::config("x").is_processing());
    }

    #[test]
    fn test_user_message_hides_component_details() {
        let err = FederaError::invariant("run list empty");
        assert_eq!(err.user_message(), "internal failure (InvariantViolation)");

        let err = FederaError::evaluation("division by zero");
        assert_eq!(err.user_message(), "evaluation error: division by zero");
    }

    #[test]
    fn test_io_error_from() {
        let io = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: FederaError = io.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
