//! Buffer manager configuration.

use federa_common::config::ExecutionConfig;
use federa_common::constants::{
    DEFAULT_MAX_PROCESSING_BATCHES, DEFAULT_PROCESSOR_BATCH_SIZE, MIN_PROCESSING_BATCHES,
};

use crate::error::{BufferError, BufferResult};

/// Configuration for the buffer manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Number of batches one operation may hold in memory.
    pub max_processing_batches: usize,
    /// Rows per batch.
    pub processor_batch_size: usize,
    /// Optional cap on the total number of rows stored across all buffers.
    pub max_rows: Option<usize>,
}

impl BufferConfig {
    /// Creates a configuration with the given batch geometry.
    pub fn new(max_processing_batches: usize, processor_batch_size: usize) -> Self {
        Self {
            max_processing_batches,
            processor_batch_size,
            max_rows: None,
        }
    }

    /// Derives the buffer geometry from an execution configuration.
    pub fn from_execution(config: &ExecutionConfig) -> Self {
        Self::new(config.max_processing_batches, config.processor_batch_size)
    }

    /// Sets the total row budget.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BufferResult<()> {
        if self.processor_batch_size == 0 {
            return Err(BufferError::config("processor_batch_size must be positive"));
        }
        if self.max_processing_batches < MIN_PROCESSING_BATCHES {
            return Err(BufferError::config(format!(
                "max_processing_batches must be at least {MIN_PROCESSING_BATCHES}"
            )));
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PROCESSING_BATCHES, DEFAULT_PROCESSOR_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_execution() {
        let exec = ExecutionConfig::for_testing();
        let config = BufferConfig::from_execution(&exec);
        assert_eq!(config.processor_batch_size, exec.processor_batch_size);
        assert_eq!(config.max_processing_batches, exec.max_processing_batches);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(BufferConfig::new(1, 10).validate().is_err());
        assert!(BufferConfig::new(2, 0).validate().is_err());
    }
}
