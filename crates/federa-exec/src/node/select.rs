//! Filtering.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{NodeId, Schema, TupleBatch};

use super::{ExecNode, NodeBase};
use crate::context::CommandContext;
use crate::expr::{evaluate_predicate, Expression};
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::BatchIterator;
use crate::subquery::SubqueryEvaluator;

/// Keeps the rows for which the predicate is TRUE.
#[derive(Debug)]
pub struct SelectNode {
    base: NodeBase,
    child: Box<dyn ExecNode>,
    child_rows: BatchIterator,
    predicate: Expression,
    subqueries: SubqueryEvaluator,
}

impl SelectNode {
    /// Creates a filter over `child`.
    pub fn new(
        id: NodeId,
        child: Box<dyn ExecNode>,
        predicate: Expression,
        subqueries: SubqueryEvaluator,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        let schema = Arc::clone(child.schema());
        Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            child,
            child_rows: BatchIterator::new(),
            predicate,
            subqueries,
        }
    }
}

impl ExecNode for SelectNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Select"
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
                    if evaluate_predicate(&self.predicate, &row, self.subqueries.results())? {
                        self.base.add_row(row);
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{binary, col, lit, BinaryOp};
    use crate::test_util::{context, drain, int_rows, int_schema, values};
    use federa_common::types::{Row, Value};

    #[test]
    fn test_select_filters() {
        let ctx = context(2);
        let child = values(1, int_schema(1), int_rows(0..10), 2);
        let even = binary(binary(col(0), BinaryOp::Modulo, lit(2)), BinaryOp::Eq, lit(0));
        let mut node = SelectNode::new(NodeId::new(2), child, even, SubqueryEvaluator::empty(&ctx), &ctx);
        node.open().unwrap();
        let rows = drain(&mut node);
        assert_eq!(rows, vec![0, 2, 4, 6, 8].into_iter().map(|i| Row::new(vec![Value::Int(i)])).collect::<Vec<_>>());
        node.close().unwrap();
    }

    #[test]
    fn test_null_predicate_drops_row() {
        let ctx = context(4);
        let rows = vec![Row::new(vec![Value::Null]), Row::new(vec![Value::Int(1)])];
        let child = values(1, int_schema(1), rows, 4);
        let predicate = binary(col(0), BinaryOp::Eq, col(0));
        let mut node = SelectNode::new(NodeId::new(2), child, predicate, SubqueryEvaluator::empty(&ctx), &ctx);
        node.open().unwrap();
        assert_eq!(drain(&mut node), int_rows(1..2));
    }
}
