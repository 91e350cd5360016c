//! Row limits.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{NodeId, Schema, TupleBatch};
use tracing::debug;

use super::{ExecNode, NodeBase};
use crate::context::CommandContext;
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::BatchIterator;

/// Skips `offset` rows, then emits at most `limit` rows.
///
/// Once the limit is reached the child is closed without being drained,
/// which releases whatever it still holds.
#[derive(Debug)]
pub struct LimitNode {
    base: NodeBase,
    child: Box<dyn ExecNode>,
    child_rows: BatchIterator,
    offset: usize,
    limit: Option<usize>,
    skipped: usize,
    emitted: usize,
}

impl LimitNode {
    /// Creates a limit node. `limit` of `None` only applies the offset.
    pub fn new(
        id: NodeId,
        child: Box<dyn ExecNode>,
        offset: usize,
        limit: Option<usize>,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        let schema = Arc::clone(child.schema());
        Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            child,
            child_rows: BatchIterator::new(),
            offset,
            limit,
            skipped: 0,
            emitted: 0,
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }
}

impl ExecNode for LimitNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Limit"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        self.child.open()
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        while !self.base.is_batch_full() {
            if self.limit_reached() {
                debug!(node_id = %self.base.id(), rows = self.emitted, "limit reached, closing input");
                self.child.close()?;
                return Ok(Poll::Ready(self.base.terminate_batch()));
            }
            match ready!(self.child_rows.next_row(self.child.as_mut())) {
                Some(_) if self.skipped < self.offset => self.skipped += 1,
                Some(row) => {
                    self.base.add_row(row);
                    self.emitted += 1;
                }
                None => {
                    self.child.close()?;
                    return Ok(Poll::Ready(self.base.terminate_batch()));
                }
            }
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        self.child.close()
    }
}
