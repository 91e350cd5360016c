//! Sort and duplicate removal.

use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{NodeId, Schema, TupleBatch};
use tracing::debug;

use super::{ExecNode, NodeBase};
use crate::buffer::{BufferCursor, TupleBuffer};
use crate::context::CommandContext;
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::{BatchIterator, NodeRows};
use crate::sort::{ListComparator, SortMode, SortUtility};

enum Phase {
    Sorting,
    Emitting {
        /// Owned result run. Kept alive while it is being read.
        buffer: TupleBuffer,
        cursor: BufferCursor,
    },
    /// Streaming duplicate removal; `done` once the input is exhausted.
    Streaming { cursor: Option<BufferCursor>, done: bool },
}

/// Sorts its input, removes duplicates, or both.
///
/// In [`SortMode::DistinctOnly`] the node streams: rows are emitted as
/// soon as they are known to be unique, including when the input
/// suspends, so consumers see output before the input is exhausted.
#[derive(Debug)]
pub struct SortNode {
    base: NodeBase,
    child: Box<dyn ExecNode>,
    child_rows: BatchIterator,
    sorter: SortUtility,
    phase: Phase,
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sorting => write!(f, "Sorting"),
            Self::Emitting { buffer, .. } => write!(f, "Emitting({})", buffer.id()),
            Self::Streaming { done, .. } => write!(f, "Streaming(done: {done})"),
        }
    }
}

impl SortNode {
    /// Creates a sort node over `child`.
    pub fn new(
        id: NodeId,
        child: Box<dyn ExecNode>,
        mode: SortMode,
        comparator: ListComparator,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        let schema = Arc::clone(child.schema());
        let sorter = SortUtility::new(mode, comparator, Arc::clone(&schema), ctx.buffer_manager());
        let phase = if mode == SortMode::DistinctOnly {
            Phase::Streaming {
                cursor: None,
                done: false,
            }
        } else {
            Phase::Sorting
        };
        Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            child,
            child_rows: BatchIterator::new(),
            sorter,
            phase,
        }
    }

    /// Returns the sort mode.
    pub fn mode(&self) -> SortMode {
        self.sorter.mode()
    }

    fn next_streaming(&mut self) -> PollResult<TupleBatch> {
        loop {
            let Phase::Streaming { cursor, done } = &mut self.phase else {
                return Err(FederaError::invariant("sort node is not streaming"));
            };

            if let Some(cursor) = cursor.as_mut() {
                while !self.base.is_batch_full() {
                    match cursor.next_row()? {
                        Some(row) => self.base.add_row(row),
                        None => break,
                    }
                }
            }
            if self.base.is_batch_full() {
                return Ok(Poll::Ready(self.base.take_batch()));
            }
            if *done {
                return Ok(Poll::Ready(self.base.terminate_batch()));
            }

            let mut input = NodeRows::new(&mut self.child_rows, self.child.as_mut());
            match self.sorter.stream_distinct(&mut input)? {
                Poll::Ready(true) => {
                    *done = true;
                    self.child.close()?;
                }
                Poll::Ready(false) => {}
                Poll::Pending => {
                    // hand out what is confirmed unique rather than wait
                    if self.base.pending_rows() > 0 {
                        return Ok(Poll::Ready(self.base.take_batch()));
                    }
                    return Ok(Poll::Pending);
                }
            }
            if cursor.is_none() {
                *cursor = self.sorter.output().map(TupleBuffer::cursor);
            }
        }
    }
}

impl ExecNode for SortNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Sort"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        self.child.open()
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        if matches!(self.phase, Phase::Streaming { .. }) {
            return self.next_streaming();
        }

        if matches!(self.phase, Phase::Sorting) {
            let mut input = NodeRows::new(&mut self.child_rows, self.child.as_mut());
            let buffer = ready!(self.sorter.sort(&mut input));
            self.child.close()?;
            debug!(node_id = %self.base.id(), buffer_id = %buffer.id(), "sort node input sorted");
            let cursor = buffer.cursor();
            self.phase = Phase::Emitting { buffer, cursor };
        }

        if let Phase::Emitting { cursor, .. } = &mut self.phase {
            while !self.base.is_batch_full() {
                match cursor.next_row()? {
                    Some(row) => self.base.add_row(row),
                    None => return Ok(Poll::Ready(self.base.terminate_batch())),
                }
            }
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        let child = self.child.close();
        let sorter = self.sorter.close();
        let result = match &mut self.phase {
            Phase::Emitting { buffer, .. } => buffer.remove(),
            _ => Ok(()),
        };
        child.and(sorter).and(result)
    }
}
