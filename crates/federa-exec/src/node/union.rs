//! Concatenation of inputs.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{NodeId, Schema, TupleBatch};

use super::{close_all, ExecNode, NodeBase};
use crate::context::CommandContext;
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::BatchIterator;

/// Emits every row of each child in turn (`UNION ALL`).
///
/// Duplicate elimination for `UNION` is a distinct sort placed above.
#[derive(Debug)]
pub struct UnionNode {
    base: NodeBase,
    children: Vec<Box<dyn ExecNode>>,
    current: usize,
    child_rows: BatchIterator,
}

impl UnionNode {
    /// Creates a union; the schema is taken from the first child.
    pub fn new(
        id: NodeId,
        schema: Arc<Schema>,
        children: Vec<Box<dyn ExecNode>>,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            children,
            current: 0,
            child_rows: BatchIterator::new(),
        }
    }
}

impl ExecNode for UnionNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Union"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        for child in &mut self.children {
            child.open()?;
        }
        Ok(())
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        while !self.base.is_batch_full() {
            let Some(child) = self.children.get_mut(self.current) else {
                return Ok(Poll::Ready(self.base.terminate_batch()));
            };
            match ready!(self.child_rows.next_row(child.as_mut())) {
                Some(row) => self.base.add_row(row),
                None => {
                    child.close()?;
                    self.current += 1;
                    self.child_rows.reset();
                }
            }
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        close_all(&mut self.children)
    }
}
