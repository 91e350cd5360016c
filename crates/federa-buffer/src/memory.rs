//! In-memory buffer manager.
//!
//! Keeps every buffer resident. Suitable for tests and for deployments
//! whose temporary data fits in memory; the execution core only sees the
//! [`BufferManager`] contract and never assumes residency.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use federa_common::types::{BufferId, Row, Schema, TupleBatch};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::BufferConfig;
use crate::error::{BufferError, BufferResult};
use crate::manager::{BufferManager, BufferStats};

/// One stored buffer.
struct BufferEntry {
    schema: Arc<Schema>,
    group: String,
    rows: Vec<Row>,
}

/// A buffer manager holding all rows in memory.
pub struct MemoryBufferManager {
    /// Configuration.
    config: BufferConfig,
    /// Buffer table: maps BufferId -> entry.
    buffers: RwLock<HashMap<BufferId, BufferEntry>>,
    /// Next buffer id to hand out.
    next_id: AtomicU64,
    /// Rows stored across all buffers.
    rows_stored: AtomicUsize,
    /// Create counter for statistics.
    created: AtomicU64,
    /// Remove counter for statistics.
    removed: AtomicU64,
    /// Write counter for statistics.
    batches_written: AtomicU64,
    /// Read counter for statistics.
    batches_read: AtomicU64,
}

impl MemoryBufferManager {
    /// Creates a new buffer manager with the given configuration.
    pub fn new(config: BufferConfig) -> BufferResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            buffers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            rows_stored: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            batches_read: AtomicU64::new(0),
        })
    }

    /// Creates a shared buffer manager.
    pub fn shared(config: BufferConfig) -> BufferResult<Arc<Self>> {
        Self::new(config).map(Arc::new)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Returns the ids of buffers still alive, in creation order.
    pub fn live_buffers(&self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = self.buffers.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the group name of a live buffer.
    pub fn group_of(&self, buffer: BufferId) -> Option<String> {
        self.buffers.read().get(&buffer).map(|e| e.group.clone())
    }

    fn reserve_rows(&self, requested: usize) -> BufferResult<()> {
        let Some(limit) = self.config.max_rows else {
            self.rows_stored.fetch_add(requested, Ordering::Relaxed);
            return Ok(());
        };
        let mut current = self.rows_stored.load(Ordering::Relaxed);
        loop {
            let available = limit.saturating_sub(current);
            if requested > available {
                return Err(BufferError::Exhausted {
                    requested,
                    available,
                });
            }
            match self.rows_stored.compare_exchange_weak(
                current,
                current + requested,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

impl BufferManager for MemoryBufferManager {
    fn create_buffer(&self, schema: Arc<Schema>, group: &str) -> BufferResult<BufferId> {
        let id = BufferId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.write().insert(
            id,
            BufferEntry {
                schema,
                group: group.to_string(),
                rows: Vec::new(),
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(buffer_id = %id, group, "created buffer");
        Ok(id)
    }

    fn add_batch(&self, buffer: BufferId, rows: Vec<Row>) -> BufferResult<()> {
        if rows.is_empty() {
            return if self.buffers.read().contains_key(&buffer) {
                Ok(())
            } else {
                Err(BufferError::NotFound { buffer_id: buffer })
            };
        }
        let mut buffers = self.buffers.write();
        let entry = buffers
            .get_mut(&buffer)
            .ok_or(BufferError::NotFound { buffer_id: buffer })?;
        let expected = entry.schema.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != expected) {
            return Err(BufferError::ArityMismatch {
                buffer_id: buffer,
                expected,
                actual: bad.len(),
            });
        }
        self.reserve_rows(rows.len())?;
        trace!(buffer_id = %buffer, rows = rows.len(), "appended batch");
        entry.rows.extend(rows);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_batch(&self, buffer: BufferId, row_number: usize) -> BufferResult<TupleBatch> {
        let buffers = self.buffers.read();
        let entry = buffers
            .get(&buffer)
            .ok_or(BufferError::NotFound { buffer_id: buffer })?;
        let row_count = entry.rows.len();
        if row_number == 0 || row_number > row_count + 1 {
            return Err(BufferError::RowOutOfRange {
                buffer_id: buffer,
                row: row_number,
                row_count,
            });
        }
        let start = row_number - 1;
        let end = (start + self.config.processor_batch_size).min(row_count);
        let rows = entry.rows[start..end].to_vec();
        self.batches_read.fetch_add(1, Ordering::Relaxed);
        Ok(TupleBatch::new(row_number, rows, end == row_count))
    }

    fn row_count(&self, buffer: BufferId) -> BufferResult<usize> {
        self.buffers
            .read()
            .get(&buffer)
            .map(|e| e.rows.len())
            .ok_or(BufferError::NotFound { buffer_id: buffer })
    }

    fn schema(&self, buffer: BufferId) -> BufferResult<Arc<Schema>> {
        self.buffers
            .read()
            .get(&buffer)
            .map(|e| Arc::clone(&e.schema))
            .ok_or(BufferError::NotFound { buffer_id: buffer })
    }

    fn remove_buffer(&self, buffer: BufferId) -> BufferResult<()> {
        let entry = self
            .buffers
            .write()
            .remove(&buffer)
            .ok_or(BufferError::NotFound { buffer_id: buffer })?;
        self.rows_stored
            .fetch_sub(entry.rows.len(), Ordering::Relaxed);
        self.removed.fetch_add(1, Ordering::Relaxed);
        debug!(buffer_id = %buffer, group = %entry.group, rows = entry.rows.len(), "removed buffer");
        Ok(())
    }

    fn max_processing_batches(&self) -> usize {
        self.config.max_processing_batches
    }

    fn processor_batch_size(&self) -> usize {
        self.config.processor_batch_size
    }

    fn stats(&self) -> BufferStats {
        BufferStats {
            created: self.created.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_read: self.batches_read.load(Ordering::Relaxed),
            rows_stored: self.rows_stored.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for MemoryBufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBufferManager")
            .field("config", &self.config)
            .field("live_buffers", &self.buffers.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_common::types::{DataType, Field, Value};

    fn manager(batch_size: usize) -> MemoryBufferManager {
        MemoryBufferManager::new(BufferConfig::new(2, batch_size)).unwrap()
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::nullable("v", DataType::Int)]))
    }

    fn rows(range: std::ops::Range<i32>) -> Vec<Row> {
        range.map(|i| Row::new(vec![Value::int(i)])).collect()
    }

    #[test]
    fn test_batches_are_contiguous() {
        let mgr = manager(3);
        let id = mgr.create_buffer(schema(), "test").unwrap();
        mgr.add_batch(id, rows(0..7)).unwrap();

        let first = mgr.get_batch(id, 1).unwrap();
        assert_eq!((first.begin_row(), first.end_row()), (1, 3));
        assert!(!first.is_terminated());

        let last = mgr.get_batch(id, 7).unwrap();
        assert_eq!(last.row_count(), 1);
        assert!(last.is_terminated());

        let past = mgr.get_batch(id, 8).unwrap();
        assert!(past.is_empty());
        assert!(past.is_terminated());

        assert!(matches!(
            mgr.get_batch(id, 9),
            Err(BufferError::RowOutOfRange { .. })
        ));
    }

    #[test]
    fn test_remove_is_reported_once() {
        let mgr = manager(4);
        let id = mgr.create_buffer(schema(), "test").unwrap();
        mgr.add_batch(id, rows(0..2)).unwrap();
        assert_eq!(mgr.stats().rows_stored, 2);

        mgr.remove_buffer(id).unwrap();
        assert!(mgr.remove_buffer(id).unwrap_err().is_not_found());
        assert!(mgr.row_count(id).unwrap_err().is_not_found());

        let stats = mgr.stats();
        assert_eq!((stats.created, stats.removed), (1, 1));
        assert_eq!(stats.rows_stored, 0);
        assert!(mgr.live_buffers().is_empty());
    }

    #[test]
    fn test_arity_checked() {
        let mgr = manager(4);
        let id = mgr.create_buffer(schema(), "test").unwrap();
        let err = mgr
            .add_batch(id, vec![Row::new(vec![Value::int(1), Value::int(2)])])
            .unwrap_err();
        assert!(matches!(err, BufferError::ArityMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn test_row_budget() {
        let mgr =
            MemoryBufferManager::new(BufferConfig::new(2, 4).with_max_rows(5)).unwrap();
        let id = mgr.create_buffer(schema(), "test").unwrap();
        mgr.add_batch(id, rows(0..4)).unwrap();
        let err = mgr.add_batch(id, rows(0..2)).unwrap_err();
        assert!(matches!(err, BufferError::Exhausted { requested: 2, available: 1 }));

        mgr.remove_buffer(id).unwrap();
        let id = mgr.create_buffer(schema(), "test").unwrap();
        assert!(mgr.add_batch(id, rows(0..5)).is_ok());
    }

    #[test]
    fn test_group_and_schema() {
        let mgr = manager(4);
        let id = mgr.create_buffer(schema(), "sort").unwrap();
        assert_eq!(mgr.group_of(id).as_deref(), Some("sort"));
        assert_eq!(mgr.schema(id).unwrap().len(), 1);
    }
}
