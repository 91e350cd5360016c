//! Projection.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{NodeId, Row, Schema, TupleBatch};

use super::{ExecNode, NodeBase};
use crate::context::CommandContext;
use crate::expr::{evaluate_with, Expression};
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::BatchIterator;
use crate::subquery::SubqueryEvaluator;

/// Computes one output column per expression.
#[derive(Debug)]
pub struct ProjectNode {
    base: NodeBase,
    child: Box<dyn ExecNode>,
    child_rows: BatchIterator,
    expressions: Vec<Expression>,
    subqueries: SubqueryEvaluator,
}

impl ProjectNode {
    /// Creates a projection producing `schema`.
    pub fn new(
        id: NodeId,
        schema: Arc<Schema>,
        child: Box<dyn ExecNode>,
        expressions: Vec<Expression>,
        subqueries: SubqueryEvaluator,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            child,
            child_rows: BatchIterator::new(),
            expressions,
            subqueries,
        }
    }

    fn project(&self, row: &Row) -> FederaResult<Row> {
        self.expressions
            .iter()
            .map(|e| evaluate_with(e, row, self.subqueries.results()))
            .collect()
    }
}

impl ExecNode for ProjectNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Project"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        self.child.open()
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        ready!(self.subqueries.prepare());
        while !self.base.is_batch_full() {
            match ready!(self.child_rows.next_row(self.child.as_mut())) {
                Some(row) => {
                    let projected = self.project(&row)?;
                    self.base.add_row(projected);
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
        let subqueries = self.subqueries.close();
        self.child.close().and(subqueries)
    }
}
