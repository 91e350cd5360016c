//! Data modification.

use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::{DataType, Field, NodeId, Row, Schema, TupleBatch, Value};
use tracing::debug;

use super::{ExecNode, NodeBase};
use crate::context::CommandContext;
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::BatchIterator;
use crate::source::{Command, RowStream};

/// Where the modification comes from.
#[derive(Debug)]
enum UpdateInput {
    /// Rows to insert, read from a child.
    Insert {
        table: String,
        child: Box<dyn ExecNode>,
        child_rows: BatchIterator,
        staged: Vec<Row>,
        exhausted: bool,
    },
    /// A single self-contained command.
    Command { command: Command, submitted: bool },
}

/// Sends update commands to a source and emits one row holding the
/// number of affected rows.
///
/// Inserted rows are sent in commands of at most one processor batch.
/// A command is never re-sent after a suspension; the node keeps its
/// stream and resumes reading the result.
#[derive(Debug)]
pub struct UpdateNode {
    base: NodeBase,
    ctx: Arc<CommandContext>,
    source_name: String,
    input: UpdateInput,
    in_flight: Option<Box<dyn RowStream>>,
    affected: i64,
    commands_sent: usize,
}

impl UpdateNode {
    /// Output schema of every update node.
    pub fn count_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::not_null("count", DataType::BigInt)]))
    }

    /// Inserts every row of `child` into `table`.
    pub fn insert(
        id: NodeId,
        source_name: String,
        table: String,
        child: Box<dyn ExecNode>,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        Self::with_input(
            id,
            source_name,
            UpdateInput::Insert {
                table,
                child,
                child_rows: BatchIterator::new(),
                staged: Vec::new(),
                exhausted: false,
            },
            ctx,
        )
    }

    /// Sends one command, typically a delete.
    pub fn command(id: NodeId, source_name: String, command: Command, ctx: &Arc<CommandContext>) -> Self {
        Self::with_input(
            id,
            source_name,
            UpdateInput::Command {
                command,
                submitted: false,
            },
            ctx,
        )
    }

    fn with_input(
        id: NodeId,
        source_name: String,
        input: UpdateInput,
        ctx: &Arc<CommandContext>,
    ) -> Self {
        Self {
            base: NodeBase::new(id, Self::count_schema(), ctx.processor_batch_size()),
            ctx: Arc::clone(ctx),
            source_name,
            input,
            in_flight: None,
            affected: 0,
            commands_sent: 0,
        }
    }

    /// Returns the number of commands sent so far.
    pub fn commands_sent(&self) -> usize {
        self.commands_sent
    }

    fn submit(&mut self, command: &Command) -> FederaResult<()> {
        debug!(node_id = %self.base.id(), source = %self.source_name, %command, "submitting update");
        let stream = self.ctx.data_manager().submit(
            self.ctx.process_id(),
            command,
            &self.source_name,
            None,
            self.base.id(),
        )?;
        self.in_flight = Some(stream);
        self.commands_sent += 1;
        Ok(())
    }

    /// Reads the affected-row counts of the command in flight.
    fn finish_in_flight(&mut self) -> PollResult<()> {
        if let Some(stream) = self.in_flight.as_mut() {
            while let Some(row) = ready!(stream.next_row()) {
                self.affected += row.value(0).to_i64().unwrap_or(0);
            }
            stream.close();
            self.in_flight = None;
        }
        Ok(Poll::Ready(()))
    }
}

impl ExecNode for UpdateNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Update"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        match &mut self.input {
            UpdateInput::Insert { child, .. } => child.open(),
            UpdateInput::Command { .. } => Ok(()),
        }
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        let batch_size = self.base.batch_size();
        loop {
            ready!(self.finish_in_flight());

            let next_command = match &mut self.input {
                UpdateInput::Command { command, submitted } => {
                    if *submitted {
                        None
                    } else {
                        *submitted = true;
                        Some(command.clone())
                    }
                }
                UpdateInput::Insert {
                    table,
                    child,
                    child_rows,
                    staged,
                    exhausted,
                } => {
                    while !*exhausted && staged.len() < batch_size {
                        match ready!(child_rows.next_row(child.as_mut())) {
                            Some(row) => staged.push(row),
                            None => {
                                *exhausted = true;
                                child.close()?;
                            }
                        }
                    }
                    if staged.is_empty() {
                        None
                    } else {
                        Some(Command::Insert {
                            table: table.clone(),
                            rows: std::mem::take(staged),
                        })
                    }
                }
            };

            match next_command {
                Some(command) => self.submit(&command)?,
                None => {
                    self.base.add_row(Row::new(vec![Value::BigInt(self.affected)]));
                    return Ok(Poll::Ready(self.base.terminate_batch()));
                }
            }
        }
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        if let Some(mut stream) = self.in_flight.take() {
            stream.close();
        }
        match &mut self.input {
            UpdateInput::Insert { child, .. } => child.close(),
            UpdateInput::Command { .. } => Ok(()),
        }
    }
}
