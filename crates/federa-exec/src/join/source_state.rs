//! One materialized join side.

use std::fmt;
use std::sync::Arc;

use federa_buffer::BufferManager;
use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{BufferId, Row, Schema};
use federa_common::JOIN_BUFFER_GROUP;
use tracing::debug;

use super::SortOption;
use crate::buffer::{BufferCursor, RowCollector, TupleBuffer};
use crate::node::ExecNode;
use crate::poll::{expect_ready, Poll, PollResult};
use crate::ready;
use crate::rows::{BatchIterator, NodeRows};
use crate::sort::{ListComparator, SortMode, SortUtility};

enum Loader {
    Collect(RowCollector),
    Sort(SortUtility),
}

/// A join input: its node, its rows once buffered, and a positionable
/// reader over them.
///
/// Rows are addressed by 1-based row number.
pub struct SourceState {
    child: Box<dyn ExecNode>,
    child_rows: BatchIterator,
    key_columns: Vec<usize>,
    sort_option: SortOption,
    loader: Option<Loader>,
    buffer: Option<TupleBuffer>,
    cursor: Option<BufferCursor>,
    null_row: Row,
    row_count: usize,
    sorted: bool,
    child_open: bool,
}

impl SourceState {
    /// Wraps a join input.
    pub fn new(child: Box<dyn ExecNode>, key_columns: Vec<usize>, sort_option: SortOption) -> Self {
        let null_row = Row::nulls(child.schema().len());
        Self {
            child,
            child_rows: BatchIterator::new(),
            key_columns,
            sort_option,
            loader: None,
            buffer: None,
            cursor: None,
            null_row,
            row_count: 0,
            sorted: false,
            child_open: false,
        }
    }

    /// Returns the input node.
    pub fn child(&self) -> &dyn ExecNode {
        self.child.as_ref()
    }

    /// Returns the input schema.
    pub fn schema(&self) -> &Arc<Schema> {
        self.child.schema()
    }

    /// Returns the join key columns.
    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    /// Returns the all-NULL row used to pad outer join results.
    pub fn null_row(&self) -> &Row {
        &self.null_row
    }

    /// Opens the input node.
    pub fn open(&mut self) -> FederaResult<()> {
        if !self.child_open {
            self.child.open()?;
            self.child_open = true;
        }
        Ok(())
    }

    /// Returns true once the input is fully buffered.
    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Returns true if the buffered rows are in key order.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Buffers the whole input, sorting it on the keys when `sort` is set
    /// and the input is not already ordered. Closes the input once read.
    pub fn load(&mut self, manager: &Arc<dyn BufferManager>, sort: bool) -> PollResult<()> {
        if self.buffer.is_some() {
            return Ok(Poll::Ready(()));
        }
        if self.loader.is_none() {
            let schema = Arc::clone(self.child.schema());
            self.loader = Some(match self.sort_mode() {
                Some(mode) if sort => Loader::Sort(SortUtility::new(
                    mode,
                    ListComparator::ascending(&self.key_columns),
                    schema,
                    manager,
                )),
                _ => Loader::Collect(RowCollector::create(manager, schema, JOIN_BUFFER_GROUP)?),
            });
        }

        let mut input = NodeRows::new(&mut self.child_rows, self.child.as_mut());
        match self.loader.as_mut() {
            Some(Loader::Sort(sorter)) => {
                let buffer = ready!(sorter.sort(&mut input));
                self.buffer = Some(buffer);
                self.sorted = true;
            }
            Some(Loader::Collect(collector)) => {
                ready!(collector.collect(&mut input));
            }
            None => return Err(FederaError::invariant("join side has no loader")),
        }
        match self.loader.take() {
            Some(Loader::Collect(collector)) => {
                self.buffer = Some(collector.finish()?);
                self.sorted = self.sort_option == SortOption::AlreadySorted;
            }
            Some(Loader::Sort(mut sorter)) => sorter.close()?,
            None => {}
        }

        self.child.close()?;
        self.after_load()?;
        debug!(
            node_id = %self.child.id(),
            rows = self.row_count,
            sorted = self.sorted,
            "join side loaded"
        );
        Ok(Poll::Ready(()))
    }

    /// Sorts rows that were buffered unsorted.
    pub fn sort_loaded(&mut self, manager: &Arc<dyn BufferManager>) -> FederaResult<()> {
        if self.sorted {
            return Ok(());
        }
        let Some(mode) = self.sort_mode() else {
            self.sorted = true;
            return Ok(());
        };
        let mut unsorted = self
            .buffer
            .take()
            .ok_or_else(|| FederaError::invariant("join side sorted before being loaded"))?;
        let mut sorter = SortUtility::new(
            mode,
            ListComparator::ascending(&self.key_columns),
            Arc::clone(unsorted.schema()),
            manager,
        );
        let mut reader = unsorted.cursor();
        let sorted = expect_ready(sorter.sort(&mut reader), "join side sort")?;
        sorter.close()?;
        unsorted.remove()?;
        self.buffer = Some(sorted);
        self.sorted = true;
        self.after_load()
    }

    fn sort_mode(&self) -> Option<SortMode> {
        match self.sort_option {
            SortOption::AlreadySorted => None,
            SortOption::Sort => Some(SortMode::Sort),
            SortOption::SortDistinct => Some(SortMode::DistinctAndSort),
        }
    }

    fn after_load(&mut self) -> FederaResult<()> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| FederaError::invariant("join side has no rows buffered"))?;
        self.row_count = buffer.row_count()?;
        self.cursor = Some(buffer.cursor());
        Ok(())
    }

    /// Returns the id of the buffered rows.
    pub fn buffer_id(&self) -> FederaResult<BufferId> {
        self.buffer
            .as_ref()
            .map(TupleBuffer::id)
            .ok_or_else(|| FederaError::invariant("join side not loaded"))
    }

    /// Returns the number of buffered rows.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns the buffered row at `row_number`, `None` past the end.
    pub fn row_at(&mut self, row_number: usize) -> FederaResult<Option<Row>> {
        if row_number == 0 || row_number > self.row_count {
            return Ok(None);
        }
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| FederaError::invariant("join side read before being loaded"))?;
        cursor.row_at(row_number)
    }

    /// Reads every buffered row.
    pub fn read_all(&self) -> FederaResult<Vec<Row>> {
        match &self.buffer {
            Some(buffer) => buffer.read_all(),
            None => Err(FederaError::invariant("join side read before being loaded")),
        }
    }

    /// Drops the buffered rows.
    pub fn release(&mut self) -> FederaResult<()> {
        self.cursor = None;
        match self.buffer.as_mut() {
            Some(buffer) => buffer.remove(),
            None => Ok(()),
        }
    }

    /// Closes the input and releases every buffer.
    pub fn close(&mut self) -> FederaResult<()> {
        let child = self.child.close();
        let loader = match self.loader.take() {
            Some(Loader::Sort(mut sorter)) => sorter.close(),
            Some(Loader::Collect(collector)) => collector.discard(),
            None => Ok(()),
        };
        let buffer = self.release();
        child.and(loader).and(buffer)
    }
}

impl fmt::Debug for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceState")
            .field("child", &self.child.id())
            .field("key_columns", &self.key_columns)
            .field("sort_option", &self.sort_option)
            .field("loaded", &self.buffer.is_some())
            .field("rows", &self.row_count)
            .field("sorted", &self.sorted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{buffer_manager, int_rows, int_schema, values, DynBuffers};
    use federa_common::types::Value;

    #[test]
    fn test_load_sorted_and_read() {
        let manager = buffer_manager(2);
        let rows: Vec<Row> = [3, 1, 2].iter().map(|i| Row::new(vec![Value::Int(*i)])).collect();
        let mut side = SourceState::new(values(1, int_schema(1), rows, 2), vec![0], SortOption::Sort);
        side.open().unwrap();
        assert!(matches!(side.load(&manager.dyn_ref(), true).unwrap(), Poll::Ready(())));
        assert!(side.is_sorted());
        assert_eq!(side.row_count(), 3);
        assert_eq!(side.row_at(1).unwrap(), Some(int_rows(1..2).remove(0)));
        assert_eq!(side.row_at(4).unwrap(), None);
        assert_eq!(side.null_row(), &Row::nulls(1));
        side.close().unwrap();
        assert_eq!(manager.stats().live(), 0);
    }

    #[test]
    fn test_collect_then_sort() {
        let manager = buffer_manager(2);
        let rows: Vec<Row> = [3, 1, 2, 1].iter().map(|i| Row::new(vec![Value::Int(*i)])).collect();
        let mut side = SourceState::new(
            values(1, int_schema(1), rows, 2),
            vec![0],
            SortOption::SortDistinct,
        );
        side.open().unwrap();
        assert!(matches!(side.load(&manager.dyn_ref(), false).unwrap(), Poll::Ready(())));
        assert!(!side.is_sorted());
        side.sort_loaded(&manager.dyn_ref()).unwrap();
        assert_eq!(side.read_all().unwrap(), int_rows(1..4));
        side.close().unwrap();
        side.close().unwrap();
        assert_eq!(manager.stats().live(), 0);
    }
}
