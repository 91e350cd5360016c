//! # federa-common
//!
//! Common types, errors, and configuration for the Federa execution core.
//!
//! This crate provides the foundational types used by every Federa crate:
//!
//! - **Types**: identifiers (`NodeId`, `BufferId`, `ProcessId`), runtime
//!   values, rows, schemas and 1-indexed tuple batches
//! - **Errors**: unified error handling with `FederaError`
//! - **Config**: execution configuration with TOML persistence
//! - **Constants**: system-wide defaults and limits
//!
//! ## Example
//!
//! ```rust
//! use federa_common::types::{Row, TupleBatch, Value};
//!
//! let rows = vec![Row::new(vec![Value::int(1)]), Row::new(vec![Value::int(2)])];
//! let batch = TupleBatch::new(1, rows, true);
//! assert_eq!(batch.end_row(), 2);
//! assert!(batch.is_terminated());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{ExecutionConfig, ExecutionConfigBuilder};
pub use constants::*;
pub use error::{ErrorCode, FederaError, FederaResult};
pub use types::{
    BufferId, DataType, Field, NodeId, NullOrdering, ProcessId, Row, Schema, TupleBatch, Value,
};
