//! System-wide constants for the Federa execution core.
//!
//! Defaults chosen here are used whenever a configuration value is omitted.

// =============================================================================
// Batch Constants
// =============================================================================

/// Row number of the first row in any node's output stream.
///
/// Batches are 1-indexed: the first batch of a stream begins at this row.
pub const FIRST_ROW_NUMBER: usize = 1;

/// Default number of rows per processor batch.
pub const DEFAULT_PROCESSOR_BATCH_SIZE: usize = 256;

/// Minimum number of rows per processor batch.
pub const MIN_PROCESSOR_BATCH_SIZE: usize = 1;

// =============================================================================
// Sort Engine Constants
// =============================================================================

/// Default number of batches that may be held in memory by one operation.
///
/// Bounds both the initial-pass window of the sort engine and the fan-in
/// of each merge pass.
pub const DEFAULT_MAX_PROCESSING_BATCHES: usize = 8;

/// Smallest usable number of processing batches.
///
/// A merge pass must combine at least two runs to make progress.
pub const MIN_PROCESSING_BATCHES: usize = 2;

// =============================================================================
// Dependent Criteria Constants
// =============================================================================

/// Default maximum number of values placed in one rewritten IN-list.
pub const DEFAULT_MAX_DEPENDENT_SET_SIZE: usize = 1000;

// =============================================================================
// Join Constants
// =============================================================================

/// Default size ratio between the larger and the smaller join side above
/// which the partitioned sort join is preferred over a full merge join.
pub const DEFAULT_PARTITIONED_JOIN_RATIO: usize = 8;

// =============================================================================
// Driver Constants
// =============================================================================

/// Default number of consecutive suspended polls tolerated by
/// `run_to_completion` before giving up.
pub const DEFAULT_MAX_PENDING_POLLS: usize = 100_000;

// =============================================================================
// Buffer Groups
// =============================================================================

/// Buffer group name used for sort runs.
pub const SORT_BUFFER_GROUP: &str = "sort";

/// Buffer group name used for join side materialization.
pub const JOIN_BUFFER_GROUP: &str = "join";

/// Buffer group name used by the grouping node.
pub const GROUPING_BUFFER_GROUP: &str = "grouping";

/// Buffer group name used by dependent criteria processing.
pub const DEPENDENT_BUFFER_GROUP: &str = "dependent";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_batches_allow_merge() {
        assert!(DEFAULT_MAX_PROCESSING_BATCHES >= MIN_PROCESSING_BATCHES);
        assert!(MIN_PROCESSING_BATCHES >= 2);
    }

    #[test]
    fn test_batch_size_defaults() {
        assert!(DEFAULT_PROCESSOR_BATCH_SIZE >= MIN_PROCESSOR_BATCH_SIZE);
        assert_eq!(FIRST_ROW_NUMBER, 1);
    }
}
