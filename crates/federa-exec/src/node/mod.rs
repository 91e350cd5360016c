//! Execution nodes.
//!
//! Every node implements [`ExecNode`]: `open`, then repeated
//! `next_batch` until a batch flagged final, then `close`. A node that
//! cannot make progress because an upstream source has nothing ready
//! returns `Poll::Pending`; the caller retries the same `next_batch` later.
//!
//! [`NodeBase`] holds the state every node shares: identity, output
//! schema and the pending-output buffer from which batches are cut.
//! Rows appended to it before a suspension stay appended, which is what
//! makes `next_batch` safe to retry.

mod access;
mod limit;
mod project;
mod select;
mod sort;
mod union;
mod update;
mod values;

pub use access::AccessNode;
pub use limit::LimitNode;
pub use project::ProjectNode;
pub use select::SelectNode;
pub use sort::SortNode;
pub use union::UnionNode;
pub use update::UpdateNode;
pub use values::ValuesNode;

use std::fmt;
use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{NodeId, Row, Schema, TupleBatch};
use federa_common::FIRST_ROW_NUMBER;

use crate::poll::PollResult;

/// A node of an execution tree.
pub trait ExecNode: fmt::Debug {
    /// Returns the plan-assigned node id.
    fn id(&self) -> NodeId;

    /// Returns a short name of the node kind.
    fn node_type(&self) -> &'static str;

    /// Returns the output schema.
    fn schema(&self) -> &Arc<Schema>;

    /// Prepares the node and its children for execution.
    fn open(&mut self) -> FederaResult<()>;

    /// Produces the next batch of output rows.
    ///
    /// Row ranges of successive batches are contiguous starting at row 1,
    /// and exactly the last batch is flagged final. Batches may be empty.
    fn next_batch(&mut self) -> PollResult<TupleBatch>;

    /// Releases every resource held by the node and its children.
    ///
    /// Idempotent; may be called at any point, including before the final
    /// batch was produced.
    fn close(&mut self) -> FederaResult<()>;
}

/// Closes every child, reporting the first failure after all were tried.
pub(crate) fn close_all<'a>(
    children: impl IntoIterator<Item = &'a mut Box<dyn ExecNode>>,
) -> FederaResult<()> {
    let mut first_error = None;
    for child in children {
        if let Err(e) = child.close() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// State shared by every node kind.
pub struct NodeBase {
    id: NodeId,
    schema: Arc<Schema>,
    batch_size: usize,
    /// Rows produced but not yet handed out.
    pending: Vec<Row>,
    /// Row number of the first pending row.
    next_row: usize,
    finished: bool,
    closed: bool,
}

impl NodeBase {
    /// Creates the base for a node emitting batches of `batch_size` rows.
    pub fn new(id: NodeId, schema: Arc<Schema>, batch_size: usize) -> Self {
        Self {
            id,
            schema,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            next_row: FIRST_ROW_NUMBER,
            finished: false,
            closed: false,
        }
    }

    /// Returns the node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the output schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Appends an output row.
    pub fn add_row(&mut self, row: Row) {
        self.pending.push(row);
    }

    /// Returns true once a full batch is pending.
    pub fn is_batch_full(&self) -> bool {
        self.pending.len() >= self.batch_size
    }

    /// Returns the number of rows not yet handed out.
    pub fn pending_rows(&self) -> usize {
        self.pending.len()
    }

    /// Cuts a non-final batch of at most `batch_size` pending rows.
    pub fn take_batch(&mut self) -> TupleBatch {
        let count = self.pending.len().min(self.batch_size);
        let rest = self.pending.split_off(count);
        let rows = std::mem::replace(&mut self.pending, rest);
        let batch = TupleBatch::new(self.next_row, rows, false);
        self.next_row += batch.row_count();
        batch
    }

    /// Cuts the next batch after the node produced its last row.
    ///
    /// The batch is final only if every pending row fits in it; otherwise
    /// a full non-final batch is returned and the call must be repeated.
    pub fn terminate_batch(&mut self) -> TupleBatch {
        if self.pending.len() > self.batch_size {
            return self.take_batch();
        }
        let rows = std::mem::take(&mut self.pending);
        let batch = TupleBatch::new(self.next_row, rows, true);
        self.next_row += batch.row_count();
        self.finished = true;
        batch
    }

    /// Returns true once the final batch was produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns true once the node was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fails if the node may no longer produce batches.
    pub fn check_active(&self) -> FederaResult<()> {
        if self.closed {
            return Err(FederaError::invariant(format!(
                "node {} read after close",
                self.id
            )));
        }
        if self.finished {
            return Err(FederaError::invariant(format!(
                "node {} read past its final batch",
                self.id
            )));
        }
        Ok(())
    }

    /// Marks the node closed. Returns false if it already was.
    pub fn mark_closed(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.pending.clear();
        true
    }
}

impl fmt::Debug for NodeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBase")
            .field("id", &self.id)
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending.len())
            .field("next_row", &self.next_row)
            .field("finished", &self.finished)
            .field("closed", &self.closed)
            .finish()
    }
}
