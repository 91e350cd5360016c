//! Error handling for the Federa execution core.
//!
//! This module provides a unified error type and result alias used
//! across all Federa crates. Suspension is not an error and never
//! appears here.

mod execution;

pub use execution::{ErrorCode, FederaError};

/// Result type alias for Federa operations.
pub type FederaResult<T> = std::result::Result<T, FederaError>;
