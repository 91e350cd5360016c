//! Owned buffer handles and positionable readers.
//!
//! A [`TupleBuffer`] is the single owner of one buffer-manager buffer. It
//! is moved, never cloned, and removes its buffer exactly once: either
//! through [`TupleBuffer::remove`] or, as a last resort, when dropped.
//! A [`BufferCursor`] only reads and never owns.

use std::sync::Arc;

use federa_buffer::BufferManager;
use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{BufferId, Row, Schema, TupleBatch};
use tracing::{debug, warn};

use crate::poll::{Poll, PollResult};
use crate::rows::TupleSource;

/// Owning handle to a temporary buffer.
#[derive(Debug)]
pub struct TupleBuffer {
    id: BufferId,
    schema: Arc<Schema>,
    manager: Arc<dyn BufferManager>,
    batch_size: usize,
    removed: bool,
}

impl TupleBuffer {
    /// Creates a new empty buffer owned by the returned handle.
    pub fn create(
        manager: &Arc<dyn BufferManager>,
        schema: Arc<Schema>,
        group: &str,
    ) -> FederaResult<Self> {
        let id = manager.create_buffer(Arc::clone(&schema), group)?;
        Ok(Self {
            id,
            schema,
            manager: Arc::clone(manager),
            batch_size: manager.processor_batch_size().max(1),
            removed: false,
        })
    }

    /// Returns the buffer id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the row schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the number of stored rows.
    pub fn row_count(&self) -> FederaResult<usize> {
        Ok(self.manager.row_count(self.id)?)
    }

    /// Appends rows, split into processor batches.
    pub fn append(&self, mut rows: Vec<Row>) -> FederaResult<()> {
        while !rows.is_empty() {
            let rest = if rows.len() > self.batch_size {
                rows.split_off(self.batch_size)
            } else {
                Vec::new()
            };
            self.manager.add_batch(self.id, rows)?;
            rows = rest;
        }
        Ok(())
    }

    /// Returns a reader positioned at the first row.
    pub fn cursor(&self) -> BufferCursor {
        BufferCursor::new(Arc::clone(&self.manager), self.id)
    }

    /// Reads every row. Intended for small buffers.
    pub fn read_all(&self) -> FederaResult<Vec<Row>> {
        let mut cursor = self.cursor();
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Returns true once the buffer has been removed.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Removes the buffer. Calling this more than once is a no-op.
    ///
    /// A buffer that is already gone is tolerated here, since removal only
    /// happens during cleanup.
    pub fn remove(&mut self) -> FederaResult<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match self.manager.remove_buffer(self.id) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(buffer_id = %self.id, "buffer already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TupleBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(buffer_id = %self.id, error = %e, "failed to remove buffer on drop");
        }
    }
}

/// Positionable, forward-iterable reader over a buffer.
///
/// Positions are 1-based row numbers. The cursor caches one batch at a
/// time, so scanning forward touches the buffer manager once per batch.
#[derive(Debug)]
pub struct BufferCursor {
    manager: Arc<dyn BufferManager>,
    buffer: BufferId,
    position: usize,
    cached: Option<TupleBatch>,
}

impl BufferCursor {
    /// Creates a cursor over `buffer` positioned at row 1.
    pub fn new(manager: Arc<dyn BufferManager>, buffer: BufferId) -> Self {
        Self {
            manager,
            buffer,
            position: 1,
            cached: None,
        }
    }

    /// Returns the buffer being read.
    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    /// Returns the row number the next call to `next_row` will return.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor to `row_number`.
    pub fn set_position(&mut self, row_number: usize) {
        self.position = row_number.max(1);
    }

    /// Returns the number of rows currently in the buffer.
    pub fn row_count(&self) -> FederaResult<usize> {
        Ok(self.manager.row_count(self.buffer)?)
    }

    /// Returns true if a row exists at the current position.
    pub fn has_next(&self) -> FederaResult<bool> {
        Ok(self.position <= self.row_count()?)
    }

    /// Returns the row at `row_number` without moving the cursor.
    pub fn row_at(&mut self, row_number: usize) -> FederaResult<Option<Row>> {
        if row_number == 0 {
            return Ok(None);
        }
        if let Some(batch) = &self.cached {
            if let Some(row) = batch.get_row(row_number) {
                return Ok(Some(row.clone()));
            }
        }
        if row_number > self.row_count()? {
            return Ok(None);
        }
        let batch = self.manager.get_batch(self.buffer, row_number)?;
        let row = batch.get_row(row_number).cloned().ok_or_else(|| {
            FederaError::invariant(format!(
                "buffer {} returned {} for row {row_number}",
                self.buffer, batch
            ))
        })?;
        self.cached = Some(batch);
        Ok(Some(row))
    }

    /// Returns the row at the current position without advancing.
    pub fn peek(&mut self) -> FederaResult<Option<Row>> {
        self.row_at(self.position)
    }

    /// Returns the row at the current position and advances.
    pub fn next_row(&mut self) -> FederaResult<Option<Row>> {
        let row = self.row_at(self.position)?;
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    /// Reads up to `max` rows from the current position.
    pub fn next_rows(&mut self, max: usize) -> FederaResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(max);
        while rows.len() < max {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }
}

impl TupleSource for BufferCursor {
    fn next_row(&mut self) -> PollResult<Option<Row>> {
        BufferCursor::next_row(self).map(Poll::Ready)
    }
}

/// Accumulates rows into processor-sized batches before writing them.
///
/// Rows pushed before a suspension stay staged in the collector, so a
/// retried collection continues where it stopped.
#[derive(Debug)]
pub struct RowCollector {
    buffer: TupleBuffer,
    staging: Vec<Row>,
    batch_size: usize,
    complete: bool,
}

impl RowCollector {
    /// Creates a collector writing into `buffer`.
    pub fn new(buffer: TupleBuffer, batch_size: usize) -> Self {
        Self {
            buffer,
            staging: Vec::new(),
            batch_size: batch_size.max(1),
            complete: false,
        }
    }

    /// Creates a collector over a fresh buffer.
    pub fn create(
        manager: &Arc<dyn BufferManager>,
        schema: Arc<Schema>,
        group: &str,
    ) -> FederaResult<Self> {
        let buffer = TupleBuffer::create(manager, schema, group)?;
        Ok(Self::new(buffer, manager.processor_batch_size()))
    }

    /// Stages one row.
    pub fn push(&mut self, row: Row) -> FederaResult<()> {
        self.staging.push(row);
        if self.staging.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes staged rows to the buffer.
    pub fn flush(&mut self) -> FederaResult<()> {
        if !self.staging.is_empty() {
            self.buffer.append(std::mem::take(&mut self.staging))?;
        }
        Ok(())
    }

    /// Drains `source` into the buffer.
    pub fn collect(&mut self, source: &mut dyn TupleSource) -> PollResult<()> {
        if self.complete {
            return Ok(Poll::Ready(()));
        }
        loop {
            match source.next_row()? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(Some(row)) => self.push(row)?,
                Poll::Ready(None) => {
                    self.flush()?;
                    self.complete = true;
                    return Ok(Poll::Ready(()));
                }
            }
        }
    }

    /// Returns the underlying buffer.
    pub fn buffer(&self) -> &TupleBuffer {
        &self.buffer
    }

    /// Drops staged rows and removes the buffer.
    pub fn discard(mut self) -> FederaResult<()> {
        self.staging.clear();
        self.buffer.remove()
    }

    /// Flushes and hands the buffer over to the caller.
    pub fn finish(mut self) -> FederaResult<TupleBuffer> {
        self.flush()?;
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::VecSource;
    use crate::test_util::{buffer_manager, int_rows, int_schema, DynBuffers};

    #[test]
    fn test_append_splits_batches() {
        let manager = buffer_manager(3);
        let buffer = TupleBuffer::create(&manager.dyn_ref(), int_schema(1), "test").unwrap();
        buffer.append(int_rows(0..8)).unwrap();
        assert_eq!(buffer.row_count().unwrap(), 8);
        assert_eq!(manager.stats().batches_written, 3);
    }

    #[test]
    fn test_cursor_positions() {
        let manager = buffer_manager(3);
        let buffer = TupleBuffer::create(&manager.dyn_ref(), int_schema(1), "test").unwrap();
        buffer.append(int_rows(0..5)).unwrap();

        let mut cursor = buffer.cursor();
        assert_eq!(cursor.next_row().unwrap(), Some(int_rows(0..1).remove(0)));
        cursor.set_position(5);
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.next_row().unwrap(), Some(int_rows(4..5).remove(0)));
        assert_eq!(cursor.next_row().unwrap(), None);
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.row_at(2).unwrap(), Some(int_rows(1..2).remove(0)));
        assert_eq!(cursor.row_at(0).unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent_and_drop_releases() {
        let manager = buffer_manager(4);
        {
            let mut buffer =
                TupleBuffer::create(&manager.dyn_ref(), int_schema(1), "test").unwrap();
            buffer.remove().unwrap();
            buffer.remove().unwrap();
            assert!(buffer.is_removed());
        }
        {
            let _leaked = TupleBuffer::create(&manager.dyn_ref(), int_schema(1), "test").unwrap();
        }
        let stats = manager.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.removed, 2);
    }

    #[test]
    fn test_collector() {
        let manager = buffer_manager(2);
        let mut collector =
            RowCollector::create(&manager.dyn_ref(), int_schema(1), "test").unwrap();
        let mut source = VecSource::new(int_rows(0..5));
        assert!(matches!(collector.collect(&mut source), Ok(Poll::Ready(()))));
        let buffer = collector.finish().unwrap();
        assert_eq!(buffer.read_all().unwrap(), int_rows(0..5));
    }
}
