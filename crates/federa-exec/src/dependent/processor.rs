//! Windowed rewriting of dependent sets into IN lists.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{Row, Value};
use tracing::{debug, trace};

use crate::buffer::{BufferCursor, TupleBuffer};
use crate::context::CommandContext;
use crate::expr::{DependentValues, Expression};
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::TupleSource;
use crate::sort::{ListComparator, SortMode, SortUtility};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Sort,
    SetProcessing,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
enum Origin {
    /// One column of rows published under a name.
    Tuples { name: String, column: usize },
    Literals(Vec<Value>),
}

enum SourceRows {
    Unsorted,
    /// Sorting, resumable.
    Sorting(SortUtility),
    Buffered {
        buffer: TupleBuffer,
        cursor: BufferCursor,
        count: usize,
    },
    Literal(Vec<Row>),
}

/// One value source and the window currently drawn from it.
///
/// Each referenced column of a published source is a value source of its
/// own, so its windows hold disjoint distinct values. Sets naming the
/// same column share one.
struct ValueSource {
    origin: Origin,
    rows: SourceRows,
    /// 0-based index of the next row to read.
    position: usize,
    window: Vec<Row>,
    has_more: bool,
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = match &self.rows {
            SourceRows::Unsorted => "unsorted",
            SourceRows::Sorting(_) => "sorting",
            SourceRows::Buffered { .. } => "buffered",
            SourceRows::Literal(_) => "literal",
        };
        f.debug_struct("ValueSource")
            .field("origin", &self.origin)
            .field("rows", &rows)
            .field("position", &self.position)
            .field("window", &self.window.len())
            .field("has_more", &self.has_more)
            .finish()
    }
}

impl ValueSource {
    fn row_count(&self) -> usize {
        match &self.rows {
            SourceRows::Buffered { count, .. } => *count,
            SourceRows::Literal(rows) => rows.len(),
            SourceRows::Unsorted | SourceRows::Sorting(_) => 0,
        }
    }

    fn read(&mut self, index: usize) -> FederaResult<Option<Row>> {
        match &mut self.rows {
            SourceRows::Buffered { cursor, .. } => cursor.row_at(index + 1),
            SourceRows::Literal(rows) => Ok(rows.get(index).cloned()),
            SourceRows::Unsorted | SourceRows::Sorting(_) => {
                Err(FederaError::invariant("dependent values read before sorting"))
            }
        }
    }

    /// Draws the next window of at most `max` rows.
    ///
    /// A row holding a NULL is never sent; it ends a window that already
    /// has values, so NULLs and values never share one.
    fn fill_window(&mut self, max: usize) -> FederaResult<()> {
        self.window.clear();
        while self.window.len() < max {
            let Some(row) = self.read(self.position)? else {
                break;
            };
            self.position += 1;
            if row.iter().any(Value::is_null) {
                if self.window.is_empty() {
                    continue;
                }
                break;
            }
            self.window.push(row);
        }
        self.has_more = self.position < self.row_count();
        Ok(())
    }

    fn restart(&mut self, max: usize) -> FederaResult<()> {
        self.position = 0;
        self.fill_window(max)
    }

    fn window_values(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self.window.iter().map(|row| row.value(0).clone()).collect();
        values.sort();
        values.dedup();
        values
    }

    fn close(&mut self) -> FederaResult<()> {
        self.window.clear();
        match std::mem::replace(&mut self.rows, SourceRows::Unsorted) {
            SourceRows::Sorting(mut sorter) => sorter.close(),
            SourceRows::Buffered { mut buffer, .. } => buffer.remove(),
            SourceRows::Unsorted | SourceRows::Literal(_) => Ok(()),
        }
    }
}

/// Published rows projected onto one referenced column.
struct Projected<'a> {
    cursor: &'a mut BufferCursor,
    column: usize,
}

impl TupleSource for Projected<'_> {
    fn next_row(&mut self) -> PollResult<Option<Row>> {
        Ok(Poll::Ready(self.cursor.next_row()?.map(|row| row.project(&[self.column]))))
    }
}

/// Turns criteria holding dependent sets into a series of plain criteria.
///
/// Each dependent set draws values from a source: rows another operator
/// published at runtime, or a fixed literal list. Sources are sorted and
/// deduplicated once, then read in windows of at most
/// `max_dependent_set_size` values. With several sources every
/// combination of their windows yields one command, produced one at a
/// time: a restart stack holds the sources that still have windows left,
/// innermost on top. Advancing pops the top source, moves it to its next
/// window and restarts every source after it from the beginning.
pub struct DependentCriteriaProcessor {
    ctx: Arc<CommandContext>,
    criteria: Expression,
    max_set_size: usize,
    sources: Vec<ValueSource>,
    /// For each dependent set in pre-order: the source it reads.
    sets: Vec<usize>,
    state: State,
    restart_stack: Vec<usize>,
    commands: usize,
}

impl fmt::Debug for DependentCriteriaProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentCriteriaProcessor")
            .field("criteria", &self.criteria.to_string())
            .field("state", &self.state)
            .field("sources", &self.sources)
            .field("restart_stack", &self.restart_stack)
            .field("commands", &self.commands)
            .finish()
    }
}

impl DependentCriteriaProcessor {
    /// Groups the dependent sets of `criteria` by value source.
    pub fn new(criteria: Expression, ctx: &Arc<CommandContext>) -> FederaResult<Self> {
        let mut sources: Vec<ValueSource> = Vec::new();
        let mut sets = Vec::new();
        for (_, values) in criteria.dependent_sets() {
            let origin = match values {
                DependentValues::Tuples { source, column } => Origin::Tuples {
                    name: source.clone(),
                    column: *column,
                },
                DependentValues::Literals(values) => Origin::Literals(values.clone()),
            };
            let existing = match &origin {
                Origin::Tuples { .. } => sources.iter().position(|s| s.origin == origin),
                Origin::Literals(_) => None,
            };
            let index = existing.unwrap_or_else(|| {
                sources.push(ValueSource {
                    origin,
                    rows: SourceRows::Unsorted,
                    position: 0,
                    window: Vec::new(),
                    has_more: false,
                });
                sources.len() - 1
            });
            sets.push(index);
        }
        if sets.is_empty() {
            return Err(FederaError::invariant(
                "dependent criteria processor needs at least one dependent set",
            ));
        }
        Ok(Self {
            ctx: Arc::clone(ctx),
            criteria,
            max_set_size: ctx.config().max_dependent_set_size.max(1),
            sources,
            sets,
            state: State::Initial,
            restart_stack: Vec::new(),
            commands: 0,
        })
    }

    /// Returns the number of distinct value sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Returns the number of criteria produced so far.
    pub fn commands_prepared(&self) -> usize {
        self.commands
    }

    /// Returns true while another combination of windows remains.
    pub fn has_next_command(&self) -> bool {
        !self.restart_stack.is_empty()
    }

    /// Produces the criteria for the next combination of windows, or
    /// `None` once there is none. The first call sorts the sources.
    pub fn prepare_next_command(&mut self) -> PollResult<Option<Expression>> {
        if self.state == State::Initial {
            self.state = State::Sort;
        }
        if self.state == State::Sort {
            ready!(self.sort_sources());
            self.state = State::SetProcessing;
            let max = self.max_set_size;
            for index in 0..self.sources.len() {
                self.sources[index].restart(max)?;
                if self.sources[index].window.is_empty() {
                    debug!(source = index, "dependent source has no values");
                    self.finish();
                    return Ok(Poll::Ready(None));
                }
                if self.sources[index].has_more {
                    self.restart_stack.push(index);
                }
            }
            return self.current_command().map(|c| Poll::Ready(Some(c)));
        }
        if self.state == State::Done || !self.advance()? {
            self.finish();
            return Ok(Poll::Ready(None));
        }
        self.current_command().map(|c| Poll::Ready(Some(c)))
    }

    fn finish(&mut self) {
        self.state = State::Done;
        self.restart_stack.clear();
    }

    fn sort_sources(&mut self) -> PollResult<()> {
        for source in &mut self.sources {
            if matches!(source.rows, SourceRows::Unsorted) {
                source.rows = match &source.origin {
                    // literal sets keep the given order, first occurrence wins
                    Origin::Literals(values) => {
                        let mut seen = BTreeSet::new();
                        SourceRows::Literal(
                            values
                                .iter()
                                .filter(|v| seen.insert((*v).clone()))
                                .map(|v| Row::new(vec![v.clone()]))
                                .collect(),
                        )
                    }
                    Origin::Tuples { name, column } => {
                        let published = self.ctx.dependent_source(name).ok_or_else(|| {
                            FederaError::component(format!("dependent source {name} is not available"))
                        })?;
                        SourceRows::Sorting(SortUtility::new(
                            SortMode::DistinctAndSort,
                            ListComparator::ascending(&[0]),
                            Arc::new(published.schema.project(&[*column])),
                            self.ctx.buffer_manager(),
                        ))
                    }
                };
            }
            if let SourceRows::Sorting(sorter) = &mut source.rows {
                let Origin::Tuples { name, column } = &source.origin else {
                    return Err(FederaError::invariant("literal dependent values are never sorted"));
                };
                let mut cursor = self.ctx.dependent_cursor(name)?;
                let mut input = Projected {
                    cursor: &mut cursor,
                    column: *column,
                };
                let buffer = ready!(sorter.sort(&mut input));
                sorter.close()?;
                let count = buffer.row_count()?;
                trace!(source = %name, column, rows = count, "dependent source sorted");
                let cursor = buffer.cursor();
                source.rows = SourceRows::Buffered { buffer, cursor, count };
            }
        }
        Ok(Poll::Ready(()))
    }

    fn advance(&mut self) -> FederaResult<bool> {
        let max = self.max_set_size;
        while let Some(index) = self.restart_stack.pop() {
            self.sources[index].fill_window(max)?;
            if self.sources[index].window.is_empty() {
                // only NULLs were left
                continue;
            }
            if self.sources[index].has_more {
                self.restart_stack.push(index);
            }
            for inner in index + 1..self.sources.len() {
                self.sources[inner].restart(max)?;
                if self.sources[inner].has_more {
                    self.restart_stack.push(inner);
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn current_command(&mut self) -> FederaResult<Expression> {
        let windows: Vec<Vec<Value>> = self
            .sets
            .iter()
            .map(|source| self.sources[*source].window_values())
            .collect();
        self.commands += 1;
        trace!(
            command = self.commands,
            sizes = ?windows.iter().map(Vec::len).collect::<Vec<_>>(),
            "dependent criteria prepared"
        );
        self.criteria.replace_dependent_sets(&windows)
    }

    /// Releases the sorted sources.
    pub fn close(&mut self) -> FederaResult<()> {
        self.finish();
        let mut result = Ok(());
        for source in &mut self.sources {
            result = result.and(source.close());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DependentValueSource;
    use crate::expr::{and, col};
    use crate::test_util::{buffer_manager, context_with, int_schema, DynBuffers};
    use crate::source::MemoryDataManager;
    use federa_common::config::ExecutionConfig;
    use federa_common::types::ProcessId;

    fn context_with_set_size(max_set_size: usize) -> Arc<CommandContext> {
        let buffers = buffer_manager(8);
        let config = ExecutionConfig::builder()
            .processor_batch_size(8)
            .max_processing_batches(2)
            .max_dependent_set_size(max_set_size)
            .build()
            .unwrap();
        CommandContext::shared(ProcessId::new(1), config, buffers.dyn_ref(), Arc::new(MemoryDataManager::new()))
    }

    fn publish(ctx: &Arc<CommandContext>, name: &str, rows: Vec<Row>) -> TupleBuffer {
        let schema = int_schema(rows.first().map_or(1, Row::len));
        let buffer = TupleBuffer::create(ctx.buffer_manager(), Arc::clone(&schema), "test").unwrap();
        buffer.append(rows).unwrap();
        ctx.register_dependent_source(name, DependentValueSource { buffer_id: buffer.id(), schema })
            .unwrap();
        buffer
    }

    fn in_list_sizes(expr: &Expression) -> Vec<usize> {
        match expr {
            Expression::InList { list, .. } => vec![list.len()],
            other => other.children().into_iter().flat_map(in_list_sizes).collect(),
        }
    }

    fn in_list_values(expr: &Expression) -> Vec<Value> {
        match expr {
            Expression::InList { list, .. } => list
                .iter()
                .filter_map(|e| match e {
                    Expression::Literal(v) => Some(v.clone()),
                    _ => None,
                })
                .collect(),
            other => other.children().into_iter().flat_map(in_list_values).collect(),
        }
    }

    fn drain(processor: &mut DependentCriteriaProcessor) -> Vec<Expression> {
        let mut out = Vec::new();
        loop {
            match processor.prepare_next_command().unwrap() {
                Poll::Ready(Some(criteria)) => out.push(criteria),
                Poll::Ready(None) => break,
                Poll::Pending => panic!("in-memory sources never suspend"),
            }
            if !processor.has_next_command() {
                break;
            }
        }
        out
    }

    #[test]
    fn test_literal_windows() {
        let ctx = context_with_set_size(100);
        let values: Vec<Value> = (0..250).map(Value::Int).collect();
        let mut processor = DependentCriteriaProcessor::new(col(0).in_literals(values.clone()), &ctx).unwrap();
        let commands = drain(&mut processor);
        let sizes: Vec<usize> = commands.iter().flat_map(in_list_sizes).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        let mut seen: Vec<Value> = commands.iter().flat_map(in_list_values).collect();
        seen.sort();
        assert_eq!(seen, values);
        assert!(!processor.has_next_command());
        processor.close().unwrap();
    }

    #[test]
    fn test_tuple_source_is_sorted_and_distinct() {
        let ctx = context_with_set_size(3);
        let rows: Vec<Row> = [5, 1, 5, 3, 2, 1, 4].iter().map(|v| Row::new(vec![Value::Int(*v)])).collect();
        let mut published = publish(&ctx, "outer", rows);
        let mut processor = DependentCriteriaProcessor::new(col(0).in_dependent("outer", 0), &ctx).unwrap();
        let commands = drain(&mut processor);
        let windows: Vec<Vec<Value>> = commands.iter().map(in_list_values).collect();
        assert_eq!(
            windows,
            vec![
                vec![Value::Int(1), Value::Int(2), Value::Int(3)],
                vec![Value::Int(4), Value::Int(5)],
            ]
        );
        processor.close().unwrap();
        ctx.remove_dependent_source("outer");
        published.remove().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
    }

    #[test]
    fn test_nulls_flush_the_window() {
        let ctx = context_with_set_size(10);
        let values = vec![Value::Int(1), Value::Int(2), Value::Null, Value::Int(3)];
        let mut processor = DependentCriteriaProcessor::new(col(0).in_literals(values), &ctx).unwrap();
        let windows: Vec<Vec<Value>> = drain(&mut processor).iter().map(in_list_values).collect();
        assert_eq!(windows, vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]]);
    }

    #[test]
    fn test_two_sources_give_cross_product_of_windows() {
        let ctx = context_with_set_size(2);
        let a: Vec<Value> = (0..3).map(Value::Int).collect();
        let b: Vec<Value> = (10..15).map(Value::Int).collect();
        let criteria = and(col(0).in_literals(a), col(1).in_literals(b));
        let mut processor = DependentCriteriaProcessor::new(criteria, &ctx).unwrap();
        assert_eq!(processor.source_count(), 2);
        let commands = drain(&mut processor);
        // 2 windows of the first source times 3 of the second
        assert_eq!(commands.len(), 6);
        let sizes: Vec<Vec<usize>> = commands.iter().map(in_list_sizes).collect();
        assert_eq!(sizes[0], vec![2, 2]);
        assert_eq!(sizes[2], vec![2, 1]);
        assert_eq!(sizes[5], vec![1, 1]);
    }

    #[test]
    fn test_each_referenced_column_is_its_own_source() {
        let ctx = context_with_set_size(2);
        let rows = vec![
            Row::new(vec![Value::Int(1), Value::Int(30)]),
            Row::new(vec![Value::Int(2), Value::Int(10)]),
            Row::new(vec![Value::Int(2), Value::Int(30)]),
        ];
        let _published = publish(&ctx, "outer", rows);
        let criteria = and(col(0).in_dependent("outer", 0), col(1).in_dependent("outer", 1));
        let mut processor = DependentCriteriaProcessor::new(criteria, &ctx).unwrap();
        assert_eq!(processor.source_count(), 2);
        let commands = drain(&mut processor);
        // {1, 2} times {10, 30}: one command, each pair covered once
        assert_eq!(commands.len(), 1);
        assert_eq!(
            in_list_values(&commands[0]),
            vec![Value::Int(1), Value::Int(2), Value::Int(10), Value::Int(30)]
        );
        processor.close().unwrap();
    }

    #[test]
    fn test_column_windows_are_disjoint() {
        let ctx = context_with_set_size(1);
        let rows = vec![
            Row::new(vec![Value::Int(1), Value::Int(30)]),
            Row::new(vec![Value::Int(2), Value::Int(10)]),
            Row::new(vec![Value::Int(2), Value::Int(30)]),
        ];
        let _published = publish(&ctx, "outer", rows);
        let criteria = and(col(0).in_dependent("outer", 0), col(1).in_dependent("outer", 1));
        let mut processor = DependentCriteriaProcessor::new(criteria, &ctx).unwrap();
        let pairs: Vec<Vec<Value>> = drain(&mut processor).iter().map(in_list_values).collect();
        assert_eq!(
            pairs,
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(1), Value::Int(30)],
                vec![Value::Int(2), Value::Int(10)],
                vec![Value::Int(2), Value::Int(30)],
            ]
        );
        processor.close().unwrap();
    }

    #[test]
    fn test_sets_on_the_same_column_share_a_source() {
        let ctx = context_with_set_size(4);
        let rows = vec![Row::new(vec![Value::Int(1), Value::Int(10)])];
        let _published = publish(&ctx, "outer", rows);
        let criteria = and(col(0).in_dependent("outer", 0), col(1).in_dependent("outer", 0));
        let processor = DependentCriteriaProcessor::new(criteria, &ctx).unwrap();
        assert_eq!(processor.source_count(), 1);
    }

    #[test]
    fn test_duplicate_literals_span_one_window_only() {
        let ctx = context_with_set_size(2);
        let values = vec![Value::Int(1), Value::Int(2), Value::Int(1)];
        let mut processor = DependentCriteriaProcessor::new(col(0).in_literals(values), &ctx).unwrap();
        let windows: Vec<Vec<Value>> = drain(&mut processor).iter().map(in_list_values).collect();
        assert_eq!(windows, vec![vec![Value::Int(1), Value::Int(2)]]);
    }

    #[test]
    fn test_empty_source_produces_nothing() {
        let ctx = context_with(Arc::new(MemoryDataManager::new()), buffer_manager(4));
        let _published = publish(&ctx, "outer", Vec::new());
        let mut processor = DependentCriteriaProcessor::new(col(0).in_dependent("outer", 0), &ctx).unwrap();
        assert!(matches!(processor.prepare_next_command().unwrap(), Poll::Ready(None)));
        assert!(!processor.has_next_command());
        processor.close().unwrap();
    }

    #[test]
    fn test_missing_source_is_a_component_error() {
        let ctx = context_with_set_size(2);
        let mut processor = DependentCriteriaProcessor::new(col(0).in_dependent("nowhere", 0), &ctx).unwrap();
        let err = processor.prepare_next_command().unwrap_err();
        assert!(err.is_component());
    }
}
