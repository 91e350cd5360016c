//! # federa-buffer
//!
//! Buffer manager for the Federa execution core.
//!
//! The buffer manager is the only shared mutable resource of a running
//! query. It stores temporary rows with batch granularity: sort runs,
//! materialized join sides, grouping inputs and dependent value lists.
//! Every buffer has exactly one owner at a time; handles are plain ids
//! and the owner is responsible for removing the buffer exactly once.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use federa_buffer::{BufferConfig, BufferManager, MemoryBufferManager};
//! use federa_common::types::{DataType, Field, Row, Schema, Value};
//!
//! let manager = MemoryBufferManager::new(BufferConfig::new(2, 4)).unwrap();
//! let schema = Arc::new(Schema::new(vec![Field::nullable("a", DataType::Int)]));
//! let id = manager.create_buffer(schema, "example").unwrap();
//! manager.add_batch(id, vec![Row::new(vec![Value::int(1)])]).unwrap();
//! assert_eq!(manager.row_count(id).unwrap(), 1);
//! manager.remove_buffer(id).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
mod manager;
mod memory;

pub use config::BufferConfig;
pub use error::{BufferError, BufferResult};
pub use manager::{BufferManager, BufferStats};
pub use memory::MemoryBufferManager;
