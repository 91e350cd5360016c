//! Reading from a data source.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{NodeId, Schema, TupleBatch};
use tracing::debug;

use super::{ExecNode, NodeBase};
use crate::context::CommandContext;
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::source::{Command, RowStream};

/// Submits one command to a source and emits the rows it returns.
///
/// The command is submitted on the first call to `next_batch`, not on
/// `open`, so that a plan which never pulls from this node never touches
/// the source.
#[derive(Debug)]
pub struct AccessNode {
    base: NodeBase,
    ctx: Arc<CommandContext>,
    source_name: String,
    connection_hint: Option<String>,
    command: Command,
    stream: Option<Box<dyn RowStream>>,
    exhausted: bool,
}

impl AccessNode {
    /// Creates an access node.
    pub fn new(
        id: NodeId,
        schema: Arc<Schema>,
        source_name: String,
        command: Command,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            ctx: Arc::clone(ctx),
            source_name,
            connection_hint: None,
            command,
            stream: None,
            exhausted: false,
        }
    }

    /// Routes the command through a specific connection.
    pub fn with_connection_hint(mut self, hint: impl Into<String>) -> Self {
        self.connection_hint = Some(hint.into());
        self
    }

    /// Returns the command this node submits.
    pub fn command(&self) -> &Command {
        &self.command
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl ExecNode for AccessNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Access"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        Ok(())
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        if self.exhausted {
            return Ok(Poll::Ready(self.base.terminate_batch()));
        }
        if self.stream.is_none() {
            debug!(node_id = %self.base.id(), source = %self.source_name, "submitting command");
            self.stream = Some(self.ctx.data_manager().submit(
                self.ctx.process_id(),
                &self.command,
                &self.source_name,
                self.connection_hint.as_deref(),
                self.base.id(),
            )?);
        }
        while !self.base.is_batch_full() {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            match ready!(stream.next_row()) {
                Some(row) => self.base.add_row(row),
                None => {
                    self.close_stream();
                    self.exhausted = true;
                    return Ok(Poll::Ready(self.base.terminate_batch()));
                }
            }
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if self.base.mark_closed() {
            self.close_stream();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{binary, col, lit, BinaryOp};
    use crate::source::MemoryDataManager;
    use crate::test_util::{buffer_manager, context_with, drain, int_rows, int_schema};

    fn query(criteria: Option<crate::expr::Expression>) -> Command {
        Command::Query {
            table: "t".into(),
            columns: vec![],
            criteria,
        }
    }

    #[test]
    fn test_access_reads_and_closes_stream() {
        let data = Arc::new(MemoryDataManager::new());
        data.register_table("t", int_schema(1), int_rows(0..10));
        let ctx = context_with(Arc::clone(&data), buffer_manager(4));
        let filter = binary(col(0), BinaryOp::GtEq, lit(5));
        let mut node = AccessNode::new(NodeId::new(3), int_schema(1), "src".into(), query(Some(filter)), &ctx);
        node.open().unwrap();
        assert!(data.submitted().is_empty());
        assert_eq!(drain(&mut node), int_rows(5..10));
        assert_eq!(data.open_streams(), 0);
        assert_eq!(data.submitted()[0].node_id, NodeId::new(3));
        node.close().unwrap();
    }

    #[test]
    fn test_suspended_access_gives_same_rows() {
        let data = Arc::new(MemoryDataManager::new().with_suspension(2));
        data.register_table("t", int_schema(1), int_rows(0..9));
        let ctx = context_with(Arc::clone(&data), buffer_manager(4));
        let mut node = AccessNode::new(NodeId::new(3), int_schema(1), "src".into(), query(None), &ctx);
        node.open().unwrap();
        assert!(matches!(node.next_batch().unwrap(), Poll::Pending));
        assert_eq!(drain(&mut node), int_rows(0..9));
        assert_eq!(data.submitted().len(), 1);
    }

    #[test]
    fn test_close_midway_closes_stream() {
        let data = Arc::new(MemoryDataManager::new());
        data.register_table("t", int_schema(1), int_rows(0..10));
        let ctx = context_with(Arc::clone(&data), buffer_manager(2));
        let mut node = AccessNode::new(NodeId::new(3), int_schema(1), "src".into(), query(None), &ctx);
        node.open().unwrap();
        assert!(matches!(node.next_batch().unwrap(), Poll::Ready(_)));
        assert_eq!(data.open_streams(), 1);
        node.close().unwrap();
        assert_eq!(data.open_streams(), 0);
    }
}
