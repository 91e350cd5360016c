//! # federa-test
//!
//! Integration tests for the Federa execution core.
//!
//! The [`Harness`] wires the in-memory collaborators together and runs
//! plans end to end, checking the batch protocol on every pull.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use federa_buffer::{BufferConfig, BufferManager, BufferStats, MemoryBufferManager};
use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{DataType, Field, ProcessId, Row, Schema, Value};
use federa_common::{ExecutionConfig, FIRST_ROW_NUMBER};
use federa_exec::context::CommandContext;
use federa_exec::poll::Poll;
use federa_exec::source::{DataManager, MemoryDataManager};
use federa_exec::QueryPlan;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber once; later calls are no-ops.
///
/// Filtering follows `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What one checked execution produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Rows in output order.
    pub rows: Vec<Row>,
    /// Batches received, including empty ones.
    pub batches: usize,
    /// Suspended polls.
    pub pending: usize,
}

/// In-memory collaborators plus a configuration.
#[derive(Debug)]
pub struct Harness {
    config: ExecutionConfig,
    data: Arc<MemoryDataManager>,
    buffers: Arc<MemoryBufferManager>,
    next_process: u64,
}

impl Harness {
    /// Harness with the small testing configuration.
    pub fn new() -> FederaResult<Self> {
        Self::with_config(ExecutionConfig::for_testing(), 0)
    }

    /// Harness whose source streams suspend every `rows` rows.
    pub fn suspending(rows: usize) -> FederaResult<Self> {
        Self::with_config(ExecutionConfig::for_testing(), rows)
    }

    /// Harness over an explicit configuration.
    pub fn with_config(config: ExecutionConfig, suspend_every: usize) -> FederaResult<Self> {
        init_tracing();
        config.validate()?;
        let buffers = MemoryBufferManager::shared(BufferConfig::from_execution(&config))?;
        Ok(Self {
            config,
            data: Arc::new(MemoryDataManager::new().with_suspension(suspend_every)),
            buffers,
            next_process: 1,
        })
    }

    /// Returns the data manager.
    pub fn data(&self) -> &Arc<MemoryDataManager> {
        &self.data
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Returns buffer accounting.
    pub fn buffer_stats(&self) -> BufferStats {
        self.buffers.stats()
    }

    /// Registers a table.
    pub fn table(&self, name: &str, schema: Arc<Schema>, rows: Vec<Row>) {
        self.data.register_table(name, schema, rows);
    }

    /// Creates a context for a new execution.
    pub fn context(&mut self) -> Arc<CommandContext> {
        let process_id = ProcessId::new(self.next_process);
        self.next_process += 1;
        CommandContext::shared(
            process_id,
            self.config.clone(),
            Arc::clone(&self.buffers) as Arc<dyn BufferManager>,
            Arc::clone(&self.data) as Arc<dyn DataManager>,
        )
    }

    /// Runs `plan` to completion, checking the batch protocol.
    ///
    /// Batches must cover rows `1..=N` contiguously and only the last may
    /// be final. The tree is closed whatever the outcome.
    pub fn run(&mut self, plan: &QueryPlan) -> FederaResult<RunOutput> {
        let ctx = self.context();
        let limit = self.config.max_pending_polls;
        let mut tree = plan.create_tree(&ctx)?;
        let result = tree.open().and_then(|()| {
            let mut out = RunOutput::default();
            let mut expected_begin = FIRST_ROW_NUMBER;
            let mut idle = 0;
            loop {
                match tree.next_batch()? {
                    Poll::Pending => {
                        out.pending += 1;
                        idle += 1;
                        if idle >= limit {
                            return Err(FederaError::SuspensionLimit { polls: idle });
                        }
                    }
                    Poll::Ready(batch) => {
                        idle = 0;
                        out.batches += 1;
                        if batch.begin_row() != expected_begin {
                            return Err(FederaError::invariant(format!(
                                "batch begins at row {}, expected {expected_begin}",
                                batch.begin_row()
                            )));
                        }
                        expected_begin += batch.row_count();
                        let last = batch.is_terminated();
                        out.rows.extend(batch.into_rows());
                        if last {
                            return Ok(out);
                        }
                    }
                }
            }
        });
        let closed = tree.close();
        let out = result?;
        closed?;
        debug!(
            rows = out.rows.len(),
            batches = out.batches,
            pending = out.pending,
            "plan run complete"
        );
        Ok(out)
    }

    /// Runs `plan` and returns only its rows.
    pub fn rows(&mut self, plan: &QueryPlan) -> FederaResult<Vec<Row>> {
        self.run(plan).map(|out| out.rows)
    }
}

/// Schema of `columns` nullable INT columns.
pub fn int_schema(columns: usize) -> Arc<Schema> {
    Arc::new(Schema::new(
        (0..columns)
            .map(|i| Field::nullable(format!("c{i}"), DataType::Int))
            .collect(),
    ))
}

/// Schema `(id INT, name STRING)`.
pub fn pair_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::nullable("id", DataType::Int),
        Field::nullable("name", DataType::String),
    ]))
}

/// Schema `(name STRING, amount INT)`.
pub fn keyed_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::nullable("key", DataType::String),
        Field::nullable("amount", DataType::Int),
    ]))
}

/// Rows `(id, name)`.
pub fn pairs(items: &[(i32, &str)]) -> Vec<Row> {
    items
        .iter()
        .map(|(id, name)| Row::new(vec![Value::Int(*id), Value::string(*name)]))
        .collect()
}

/// Sorts rows by their natural order.
pub fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort();
    rows
}
