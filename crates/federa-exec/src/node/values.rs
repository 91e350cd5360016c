//! Constant rows.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{NodeId, Row, Schema, TupleBatch};

use super::{ExecNode, NodeBase};
use crate::poll::{Poll, PollResult};

/// Emits a fixed list of rows.
#[derive(Debug)]
pub struct ValuesNode {
    base: NodeBase,
    rows: std::vec::IntoIter<Row>,
}

impl ValuesNode {
    /// Creates a node emitting `rows` in batches of `batch_size`.
    pub fn new(id: NodeId, schema: Arc<Schema>, rows: Vec<Row>, batch_size: usize) -> Self {
        Self {
            base: NodeBase::new(id, schema, batch_size),
            rows: rows.into_iter(),
        }
    }
}

impl ExecNode for ValuesNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Values"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        Ok(())
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        while !self.base.is_batch_full() {
            match self.rows.next() {
                Some(row) => self.base.add_row(row),
                None => return Ok(Poll::Ready(self.base.terminate_batch())),
            }
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        self.base.mark_closed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{drain, int_rows, int_schema};

    #[test]
    fn test_values_batches() {
        let mut node = ValuesNode::new(NodeId::new(0), int_schema(1), int_rows(0..5), 2);
        node.open().unwrap();
        assert_eq!(drain(&mut node), int_rows(0..5));
        node.close().unwrap();
        node.close().unwrap();
    }

    #[test]
    fn test_values_exact_multiple() {
        let mut node = ValuesNode::new(NodeId::new(0), int_schema(1), int_rows(0..4), 2);
        node.open().unwrap();
        assert_eq!(drain(&mut node), int_rows(0..4));
    }
}
