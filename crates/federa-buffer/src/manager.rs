//! The buffer manager interface.

use std::fmt::Debug;
use std::sync::Arc;

use federa_common::types::{BufferId, Row, Schema, TupleBatch};

use crate::error::BufferResult;

/// Batch-granular temporary row storage.
///
/// Buffers are append-only and addressed by 1-based row number. An
/// implementation may keep rows in memory or spill them; callers only
/// rely on the contract below.
pub trait BufferManager: Debug + Send + Sync {
    /// Creates an empty buffer for rows of `schema`.
    ///
    /// `group` names the kind of temporary storage for accounting.
    fn create_buffer(&self, schema: Arc<Schema>, group: &str) -> BufferResult<BufferId>;

    /// Appends rows to the end of a buffer.
    fn add_batch(&self, buffer: BufferId, rows: Vec<Row>) -> BufferResult<()>;

    /// Returns up to one processor batch of rows starting at `row_number`.
    ///
    /// The batch is marked terminated when it reaches the last stored row.
    /// Asking for `row_count + 1` yields an empty terminated batch.
    fn get_batch(&self, buffer: BufferId, row_number: usize) -> BufferResult<TupleBatch>;

    /// Returns the number of rows stored in a buffer.
    fn row_count(&self, buffer: BufferId) -> BufferResult<usize>;

    /// Returns the schema a buffer was created with.
    fn schema(&self, buffer: BufferId) -> BufferResult<Arc<Schema>>;

    /// Removes a buffer and releases its rows.
    fn remove_buffer(&self, buffer: BufferId) -> BufferResult<()>;

    /// Number of batches one operation may hold in memory.
    fn max_processing_batches(&self) -> usize;

    /// Number of rows in one processor batch.
    fn processor_batch_size(&self) -> usize;

    /// Returns accounting statistics.
    fn stats(&self) -> BufferStats;
}

/// Buffer manager statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Number of buffers created.
    pub created: u64,
    /// Number of buffers removed.
    pub removed: u64,
    /// Number of batches appended.
    pub batches_written: u64,
    /// Number of batches read.
    pub batches_read: u64,
    /// Rows currently stored across live buffers.
    pub rows_stored: usize,
}

impl BufferStats {
    /// Returns the number of buffers still alive.
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_live() {
        let stats = BufferStats {
            created: 5,
            removed: 3,
            ..Default::default()
        };
        assert_eq!(stats.live(), 2);
    }
}
