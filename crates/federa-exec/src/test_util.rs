//! Shared fixtures for unit tests.

use std::ops::Range;
use std::sync::Arc;

use federa_buffer::{BufferConfig, BufferManager, MemoryBufferManager};
use federa_common::config::ExecutionConfig;
use federa_common::types::{DataType, Field, NodeId, ProcessId, Row, Schema, Value};

use crate::context::CommandContext;
use crate::node::{ExecNode, ValuesNode};
use crate::poll::Poll;
use crate::source::MemoryDataManager;

pub(crate) trait DynBuffers {
    fn dyn_ref(&self) -> Arc<dyn BufferManager>;
}

impl DynBuffers for Arc<MemoryBufferManager> {
    fn dyn_ref(&self) -> Arc<dyn BufferManager> {
        Arc::clone(self) as Arc<dyn BufferManager>
    }
}

pub(crate) fn buffer_manager(batch_size: usize) -> Arc<MemoryBufferManager> {
    buffer_manager_with(2, batch_size)
}

pub(crate) fn buffer_manager_with(
    max_batches: usize,
    batch_size: usize,
) -> Arc<MemoryBufferManager> {
    MemoryBufferManager::shared(BufferConfig::new(max_batches, batch_size)).unwrap()
}

pub(crate) fn int_schema(columns: usize) -> Arc<Schema> {
    Arc::new(Schema::new(
        (0..columns)
            .map(|i| Field::nullable(format!("c{i}"), DataType::Int))
            .collect(),
    ))
}

pub(crate) fn int_rows(range: Range<i32>) -> Vec<Row> {
    range.map(|i| Row::new(vec![Value::Int(i)])).collect()
}

pub(crate) fn pair_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::nullable("id", DataType::Int),
        Field::nullable("name", DataType::String),
    ]))
}

pub(crate) fn pairs(items: &[(i32, &str)]) -> Vec<Row> {
    items
        .iter()
        .map(|(i, s)| Row::new(vec![Value::Int(*i), Value::string(*s)]))
        .collect()
}

pub(crate) fn context(batch_size: usize) -> Arc<CommandContext> {
    context_with(
        Arc::new(MemoryDataManager::new()),
        buffer_manager(batch_size),
    )
}

pub(crate) fn context_with(
    data: Arc<MemoryDataManager>,
    buffers: Arc<MemoryBufferManager>,
) -> Arc<CommandContext> {
    let config = ExecutionConfig::builder()
        .processor_batch_size(buffers.processor_batch_size())
        .max_processing_batches(buffers.max_processing_batches())
        .build()
        .unwrap();
    CommandContext::shared(ProcessId::new(1), config, buffers, data)
}

pub(crate) fn values(id: u32, schema: Arc<Schema>, rows: Vec<Row>, batch_size: usize) -> Box<dyn ExecNode> {
    Box::new(ValuesNode::new(NodeId::new(id), schema, rows, batch_size))
}

/// Pulls every batch, checking row numbering and the final flag.
pub(crate) fn drain(node: &mut dyn ExecNode) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut expected_begin = 1;
    let mut pending = 0;
    loop {
        match node.next_batch().unwrap() {
            Poll::Pending => {
                pending += 1;
                assert!(pending < 100_000, "node never finished");
            }
            Poll::Ready(batch) => {
                assert_eq!(batch.begin_row(), expected_begin, "gap in {batch}");
                expected_begin += batch.row_count();
                let done = batch.is_terminated();
                rows.extend(batch.into_rows());
                if done {
                    return rows;
                }
            }
        }
    }
}

pub(crate) fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by(|a, b| a.values().cmp(b.values()));
    rows
}

/// Row source that suspends before every `every`-th row.
pub(crate) struct PausingSource {
    rows: std::vec::IntoIter<Row>,
    every: usize,
    since_pause: usize,
}

impl PausingSource {
    pub(crate) fn new(rows: Vec<Row>, every: usize) -> Self {
        Self {
            rows: rows.into_iter(),
            every,
            since_pause: every,
        }
    }
}

impl crate::rows::TupleSource for PausingSource {
    fn next_row(&mut self) -> crate::poll::PollResult<Option<Row>> {
        if self.since_pause >= self.every {
            self.since_pause = 0;
            return Ok(Poll::Pending);
        }
        self.since_pause += 1;
        Ok(Poll::Ready(self.rows.next()))
    }
}
