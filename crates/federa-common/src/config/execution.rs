//! Execution configuration.
//!
//! Controls batch sizing, sort memory, dependent IN-list windows and the
//! driver's re-poll bound. Can be persisted as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_DEPENDENT_SET_SIZE, DEFAULT_MAX_PENDING_POLLS, DEFAULT_MAX_PROCESSING_BATCHES,
    DEFAULT_PARTITIONED_JOIN_RATIO, DEFAULT_PROCESSOR_BATCH_SIZE, MIN_PROCESSING_BATCHES,
    MIN_PROCESSOR_BATCH_SIZE,
};
use crate::error::{FederaError, FederaResult};
use crate::types::NullOrdering;

/// Execution configuration.
///
/// # Example
///
/// ```rust
/// use federa_common::config::ExecutionConfig;
///
/// let config = ExecutionConfig::builder()
///     .processor_batch_size(64)
///     .max_dependent_set_size(100)
///     .build()
///     .unwrap();
/// assert_eq!(config.processor_batch_size, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Rows per processor batch.
    #[serde(default = "default_processor_batch_size")]
    pub processor_batch_size: usize,

    /// Batches one operation may hold in memory (sort window, merge fan-in).
    #[serde(default = "default_max_processing_batches")]
    pub max_processing_batches: usize,

    /// Maximum number of values in one rewritten dependent IN-list.
    #[serde(default = "default_max_dependent_set_size")]
    pub max_dependent_set_size: usize,

    /// Consecutive suspended polls tolerated by `run_to_completion`.
    #[serde(default = "default_max_pending_polls")]
    pub max_pending_polls: usize,

    /// Larger/smaller side ratio that enables the partitioned sort join.
    #[serde(default = "default_partitioned_join_ratio")]
    pub partitioned_join_ratio: usize,

    /// Default placement of NULL in sort keys.
    #[serde(default)]
    pub null_ordering: NullOrdering,
}

fn default_processor_batch_size() -> usize {
    DEFAULT_PROCESSOR_BATCH_SIZE
}

fn default_max_processing_batches() -> usize {
    DEFAULT_MAX_PROCESSING_BATCHES
}

fn default_max_dependent_set_size() -> usize {
    DEFAULT_MAX_DEPENDENT_SET_SIZE
}

fn default_max_pending_polls() -> usize {
    DEFAULT_MAX_PENDING_POLLS
}

fn default_partitioned_join_ratio() -> usize {
    DEFAULT_PARTITIONED_JOIN_RATIO
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            processor_batch_size: default_processor_batch_size(),
            max_processing_batches: default_max_processing_batches(),
            max_dependent_set_size: default_max_dependent_set_size(),
            max_pending_polls: default_max_pending_polls(),
            partitioned_join_ratio: default_partitioned_join_ratio(),
            null_ordering: NullOrdering::default(),
        }
    }
}

impl ExecutionConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a small configuration for testing.
    ///
    /// Tiny batches force multi-batch streams and multi-pass sorts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            processor_batch_size: 4,
            max_processing_batches: 2,
            max_pending_polls: 10_000,
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> FederaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> FederaResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| FederaError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> FederaResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> FederaResult<String> {
        toml::to_string_pretty(self).map_err(|e| FederaError::config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FederaResult<()> {
        if self.processor_batch_size < MIN_PROCESSOR_BATCH_SIZE {
            return Err(FederaError::config("processor_batch_size must be at least 1"));
        }
        if self.max_processing_batches < MIN_PROCESSING_BATCHES {
            return Err(FederaError::config(format!(
                "max_processing_batches must be at least {MIN_PROCESSING_BATCHES}"
            )));
        }
        if self.max_dependent_set_size == 0 {
            return Err(FederaError::config("max_dependent_set_size must be positive"));
        }
        if self.partitioned_join_ratio == 0 {
            return Err(FederaError::config("partitioned_join_ratio must be positive"));
        }
        Ok(())
    }

    /// Number of rows the sort engine may hold in memory at once.
    #[must_use]
    pub fn sort_window_rows(&self) -> usize {
        self.processor_batch_size * self.max_processing_batches
    }

    /// Creates a builder for configuration.
    #[must_use]
    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder::new()
    }
}

/// Builder for execution configuration.
#[derive(Debug, Default)]
pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the processor batch size.
    #[must_use]
    pub fn processor_batch_size(mut self, rows: usize) -> Self {
        self.config.processor_batch_size = rows;
        self
    }

    /// Sets the number of processing batches.
    #[must_use]
    pub fn max_processing_batches(mut self, batches: usize) -> Self {
        self.config.max_processing_batches = batches;
        self
    }

    /// Sets the maximum dependent set size.
    #[must_use]
    pub fn max_dependent_set_size(mut self, size: usize) -> Self {
        self.config.max_dependent_set_size = size;
        self
    }

    /// Sets the re-poll bound used by `run_to_completion`.
    #[must_use]
    pub fn max_pending_polls(mut self, polls: usize) -> Self {
        self.config.max_pending_polls = polls;
        self
    }

    /// Sets the partitioned join size ratio.
    #[must_use]
    pub fn partitioned_join_ratio(mut self, ratio: usize) -> Self {
        self.config.partitioned_join_ratio = ratio;
        self
    }

    /// Sets the default null ordering.
    #[must_use]
    pub fn null_ordering(mut self, ordering: NullOrdering) -> Self {
        self.config.null_ordering = ordering;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> FederaResult<ExecutionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ExecutionConfig::default();
        assert_eq!(config.processor_batch_size, DEFAULT_PROCESSOR_BATCH_SIZE);
        assert_eq!(config.null_ordering, NullOrdering::Low);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ExecutionConfig::builder()
            .processor_batch_size(10)
            .max_processing_batches(3)
            .null_ordering(NullOrdering::High)
            .build()
            .unwrap();
        assert_eq!(config.sort_window_rows(), 30);
        assert_eq!(config.null_ordering, NullOrdering::High);
    }

    #[test]
    fn test_builder_rejects_single_processing_batch() {
        let err = ExecutionConfig::builder()
            .max_processing_batches(1)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_processing_batches"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ExecutionConfig::from_toml("max_dependent_set_size = 100\n").unwrap();
        assert_eq!(config.max_dependent_set_size, 100);
        assert_eq!(config.processor_batch_size, DEFAULT_PROCESSOR_BATCH_SIZE);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(ExecutionConfig::from_toml("processor_batch_size = \"x\"").is_err());
        assert!(ExecutionConfig::from_toml("processor_batch_size = 0").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("execution.toml");

        let config = ExecutionConfig::for_testing();
        config.save(&path).unwrap();

        let loaded = ExecutionConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
