//! Configuration for the Federa execution core.

mod execution;

pub use execution::{ExecutionConfig, ExecutionConfigBuilder};
