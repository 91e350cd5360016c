//! Top-level driver of one plan execution.

use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{Row, Schema, TupleBatch};
use tracing::{debug, info, warn};

use crate::context::CommandContext;
use crate::node::ExecNode;
use crate::plan::QueryPlan;
use crate::poll::{Poll, PollResult};

/// Runs one execution tree built from a plan.
///
/// The tree is built and opened on construction and closed once the
/// final batch is handed out, on the first error, or on [`close`].
///
/// [`close`]: QueryProcessor::close
#[derive(Debug)]
pub struct QueryProcessor {
    root: Box<dyn ExecNode>,
    ctx: Arc<CommandContext>,
    rows_returned: usize,
    done: bool,
    closed: bool,
}

impl QueryProcessor {
    /// Builds a fresh tree for `plan` and opens it.
    pub fn new(plan: &QueryPlan, ctx: Arc<CommandContext>) -> FederaResult<Self> {
        let root = plan.create_tree(&ctx)?;
        Self::start(root, ctx)
    }

    /// Opens an already built tree.
    pub(crate) fn start(mut root: Box<dyn ExecNode>, ctx: Arc<CommandContext>) -> FederaResult<Self> {
        if let Err(e) = root.open() {
            if let Err(close_err) = root.close() {
                warn!(process_id = %ctx.process_id(), error = %close_err, "tree close failed after open error");
            }
            return Err(e);
        }
        debug!(
            process_id = %ctx.process_id(),
            root = %root.id(),
            node_type = root.node_type(),
            "execution tree opened"
        );
        Ok(Self {
            root,
            ctx,
            rows_returned: 0,
            done: false,
            closed: false,
        })
    }

    /// Returns the output schema.
    pub fn schema(&self) -> &Arc<Schema> {
        self.root.schema()
    }

    /// Returns the number of rows handed out so far.
    pub fn rows_returned(&self) -> usize {
        self.rows_returned
    }

    /// Returns true once the final batch was handed out.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Pulls the next batch from the root.
    ///
    /// `Poll::Pending` means no batch is ready yet; call again later.
    pub fn next_batch(&mut self) -> PollResult<TupleBatch> {
        if self.done || self.closed {
            return Err(FederaError::processing("query processor already finished"));
        }
        match self.root.next_batch() {
            Ok(Poll::Ready(batch)) => {
                self.rows_returned += batch.row_count();
                if batch.is_terminated() {
                    self.done = true;
                    info!(
                        process_id = %self.ctx.process_id(),
                        rows = self.rows_returned,
                        "query complete"
                    );
                    self.close()?;
                }
                Ok(Poll::Ready(batch))
            }
            Ok(Poll::Pending) => Ok(Poll::Pending),
            Err(e) => {
                warn!(process_id = %self.ctx.process_id(), error = %e, "query failed");
                self.close_quietly();
                Err(e)
            }
        }
    }

    /// Pulls every batch and returns all rows.
    ///
    /// Suspensions are retried immediately. After
    /// `max_pending_polls` consecutive polls without a row the query is
    /// abandoned with [`FederaError::SuspensionLimit`].
    pub fn run_to_completion(&mut self) -> FederaResult<Vec<Row>> {
        let limit = self.ctx.config().max_pending_polls.max(1);
        let mut rows = Vec::new();
        let mut idle = 0usize;
        loop {
            match self.next_batch()? {
                Poll::Ready(batch) => {
                    let last = batch.is_terminated();
                    if batch.is_empty() {
                        idle += 1;
                    } else {
                        idle = 0;
                        rows.extend(batch.into_rows());
                    }
                    if last {
                        return Ok(rows);
                    }
                }
                Poll::Pending => idle += 1,
            }
            if idle >= limit {
                self.close_quietly();
                return Err(FederaError::SuspensionLimit { polls: idle });
            }
        }
    }

    /// Closes the tree. Idempotent.
    pub fn close(&mut self) -> FederaResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.root.close()
    }

    /// Closes the tree on a path that is already failing or has no caller
    /// to report to; a close error is logged instead.
    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            warn!(process_id = %self.ctx.process_id(), error = %e, "query close failed");
        }
    }
}

impl Drop for QueryProcessor {
    fn drop(&mut self) {
        self.close_quietly();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanBuilder;
    use crate::source::{Command, MemoryDataManager};
    use crate::test_util::{buffer_manager, context, context_with, int_rows, int_schema};
    use federa_buffer::BufferManager;
    use federa_common::types::NodeId;
    use parking_lot::Mutex;
    use std::io;

    /// Node whose pulls and close both fail.
    #[derive(Debug)]
    struct BrokenNode {
        schema: Arc<Schema>,
        close_calls: Arc<Mutex<usize>>,
    }

    impl ExecNode for BrokenNode {
        fn id(&self) -> NodeId {
            NodeId::new(0)
        }

        fn node_type(&self) -> &'static str {
            "Broken"
        }

        fn schema(&self) -> &Arc<Schema> {
            &self.schema
        }

        fn open(&mut self) -> FederaResult<()> {
            Ok(())
        }

        fn next_batch(&mut self) -> PollResult<TupleBatch> {
            Err(FederaError::processing("pull failed"))
        }

        fn close(&mut self) -> FederaResult<()> {
            *self.close_calls.lock() += 1;
            Err(FederaError::component("release failed"))
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scan(table: &str) -> Command {
        Command::Query {
            table: table.into(),
            columns: vec![],
            criteria: None,
        }
    }

    #[test]
    fn test_runs_and_releases() {
        let buffers = buffer_manager(4);
        let ctx = context_with(Arc::new(MemoryDataManager::new()), Arc::clone(&buffers));
        let mut builder = PlanBuilder::new();
        let values = builder.values(int_schema(1), int_rows(0..20).into_iter().rev().collect());
        let sorted = builder.sort_by_columns(values, &[0]).unwrap();
        let plan = builder.build(sorted).unwrap();

        let mut processor = QueryProcessor::new(&plan, ctx).unwrap();
        let rows = processor.run_to_completion().unwrap();
        assert_eq!(rows, int_rows(0..20));
        assert!(processor.is_done());
        assert_eq!(processor.rows_returned(), 20);
        assert_eq!(buffers.stats().live(), 0);
        assert!(processor.next_batch().is_err());
    }

    #[test]
    fn test_suspending_source_completes() {
        let data = Arc::new(MemoryDataManager::new().with_suspension(3));
        data.register_table("t", int_schema(1), int_rows(0..10));
        let ctx = context_with(Arc::clone(&data), buffer_manager(4));
        let mut builder = PlanBuilder::new();
        let access = builder.access(int_schema(1), "src", scan("t"));
        let plan = builder.build(access).unwrap();

        let mut processor = QueryProcessor::new(&plan, ctx).unwrap();
        assert_eq!(processor.run_to_completion().unwrap(), int_rows(0..10));
        assert_eq!(data.open_streams(), 0);
    }

    #[test]
    fn test_failure_closes_tree() {
        let data = Arc::new(MemoryDataManager::new());
        data.register_table("t", int_schema(1), int_rows(0..10));
        data.fail_source("src");
        let ctx = context_with(Arc::clone(&data), buffer_manager(4));
        let mut builder = PlanBuilder::new();
        let access = builder.access(int_schema(1), "src", scan("t"));
        let plan = builder.build(access).unwrap();

        let result = QueryProcessor::new(&plan, ctx).and_then(|mut p| p.run_to_completion());
        assert!(result.unwrap_err().is_processing());
        assert_eq!(data.open_streams(), 0);
    }

    #[test]
    fn test_close_before_end() {
        let ctx = context(2);
        let mut builder = PlanBuilder::new();
        let values = builder.values(int_schema(1), int_rows(0..10));
        let plan = builder.build(values).unwrap();
        let mut processor = QueryProcessor::new(&plan, ctx).unwrap();
        assert!(matches!(processor.next_batch().unwrap(), Poll::Ready(_)));
        processor.close().unwrap();
        processor.close().unwrap();
        assert!(processor.next_batch().is_err());
    }

    #[test]
    fn test_close_errors_are_logged_not_raised() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let close_calls = Arc::new(Mutex::new(0));

        let err = tracing::subscriber::with_default(subscriber, || {
            let root = Box::new(BrokenNode {
                schema: int_schema(1),
                close_calls: Arc::clone(&close_calls),
            });
            let mut processor = QueryProcessor::start(root, context(2)).unwrap();
            let err = processor.next_batch().unwrap_err();
            drop(processor);
            err
        });

        // the pull error wins over the close error
        assert!(err.is_processing());
        assert_eq!(*close_calls.lock(), 1);
        let logged = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logged.contains("query close failed"), "{logged}");
        assert!(logged.contains("release failed"), "{logged}");
    }
}
