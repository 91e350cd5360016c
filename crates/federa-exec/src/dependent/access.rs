//! Access node whose command is parameterized by runtime values.

use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{NodeId, Schema, TupleBatch};
use tracing::debug;

use super::DependentCriteriaProcessor;
use crate::context::CommandContext;
use crate::node::{ExecNode, NodeBase};
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::source::{Command, RowStream};

/// Submits one command per window of dependent values and emits the
/// rows of all of them.
///
/// Every source value falls in exactly one window, so the commands
/// return disjoint row sets.
#[derive(Debug)]
pub struct DependentAccessNode {
    base: NodeBase,
    ctx: Arc<CommandContext>,
    source_name: String,
    command: Command,
    processor: DependentCriteriaProcessor,
    stream: Option<Box<dyn RowStream>>,
    commands_sent: usize,
    exhausted: bool,
}

impl DependentAccessNode {
    /// Creates a dependent access node. The command's criteria must hold
    /// at least one dependent set.
    pub fn new(
        id: NodeId,
        schema: Arc<Schema>,
        source_name: String,
        command: Command,
        ctx: &Arc<CommandContext>,
    ) -> FederaResult<Self> {
        let criteria = command
            .criteria()
            .filter(|c| c.has_dependent_sets())
            .cloned()
            .ok_or_else(|| FederaError::invalid_plan(id, "dependent access without dependent criteria"))?;
        Ok(Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            ctx: Arc::clone(ctx),
            source_name,
            processor: DependentCriteriaProcessor::new(criteria, ctx)?,
            command,
            stream: None,
            commands_sent: 0,
            exhausted: false,
        })
    }

    /// Returns the number of commands submitted so far.
    pub fn commands_sent(&self) -> usize {
        self.commands_sent
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    /// Submits the next rewritten command. Returns false once there is
    /// none left.
    fn submit_next(&mut self) -> PollResult<bool> {
        let Some(criteria) = ready!(self.processor.prepare_next_command()) else {
            return Ok(Poll::Ready(false));
        };
        let command = self.command.with_criteria(Some(criteria));
        self.stream = Some(self.ctx.data_manager().submit(
            self.ctx.process_id(),
            &command,
            &self.source_name,
            None,
            self.base.id(),
        )?);
        self.commands_sent += 1;
        debug!(
            node_id = %self.base.id(),
            source = %self.source_name,
            command = self.commands_sent,
            "submitted dependent command"
        );
        Ok(Poll::Ready(true))
    }
}

impl ExecNode for DependentAccessNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "DependentAccess"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        Ok(())
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        while !self.exhausted && !self.base.is_batch_full() {
            if self.stream.is_none() && !ready!(self.submit_next()) {
                self.exhausted = true;
                break;
            }
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            match stream.next_row()? {
                Poll::Ready(Some(row)) => self.base.add_row(row),
                Poll::Ready(None) => {
                    self.close_stream();
                    if !self.processor.has_next_command() {
                        self.exhausted = true;
                    }
                }
                Poll::Pending => {
                    // rows already read are safe to hand out
                    if self.base.pending_rows() > 0 {
                        return Ok(Poll::Ready(self.base.take_batch()));
                    }
                    return Ok(Poll::Pending);
                }
            }
        }
        if self.exhausted {
            self.processor.close()?;
            return Ok(Poll::Ready(self.base.terminate_batch()));
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        self.close_stream();
        self.processor.close()
    }
}
