//! Grouping and aggregation.
//!
//! A [`GroupingNode`] runs in three phases. Collect evaluates the group
//! expressions and aggregate arguments for every input row. When there
//! are group expressions those intermediate rows go straight into a sort
//! on the group columns; a global aggregate only buffers them. Group then
//! walks the intermediate rows once, closing a group whenever the group
//! columns change.

mod aggregate;

pub use aggregate::{
    create_aggregate, Aggregate, AggregateFunction, AggregateSpec, Avg, Count, DistinctFilter,
    Extreme, NullFilter, Sum,
};

use std::fmt;
use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{DataType, Field, NodeId, Row, Schema, TupleBatch, Value};
use federa_common::GROUPING_BUFFER_GROUP;
use tracing::debug;

use crate::buffer::{BufferCursor, RowCollector, TupleBuffer};
use crate::context::CommandContext;
use crate::expr::{evaluate, Expression};
use crate::node::{ExecNode, NodeBase};
use crate::poll::{Poll, PollResult};
use crate::ready;
use crate::rows::{BatchIterator, NodeRows, TupleSource};
use crate::sort::{ListComparator, SortMode, SortUtility};

enum Collector {
    Sort(SortUtility),
    Buffer(RowCollector),
}

enum Phase {
    Collect(Collector),
    Group {
        buffer: TupleBuffer,
        cursor: BufferCursor,
    },
    Done,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collect(Collector::Sort(_)) => write!(f, "Collect(sort)"),
            Self::Collect(Collector::Buffer(_)) => write!(f, "Collect(buffer)"),
            Self::Group { buffer, .. } => write!(f, "Group({})", buffer.id()),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Evaluates group expressions and aggregate arguments over input rows.
struct Projecting<'a> {
    input: NodeRows<'a>,
    expressions: &'a [Expression],
}

impl TupleSource for Projecting<'_> {
    fn next_row(&mut self) -> PollResult<Option<Row>> {
        let row = match ready!(self.input.next_row()) {
            Some(row) => row,
            None => return Ok(Poll::Ready(None)),
        };
        let values = self
            .expressions
            .iter()
            .map(|expr| evaluate(expr, &row))
            .collect::<FederaResult<Vec<Value>>>()?;
        Ok(Poll::Ready(Some(Row::new(values))))
    }
}

/// Groups its input and computes aggregates per group.
///
/// Output rows hold the group values followed by one value per
/// aggregate. Without group expressions exactly one row is produced,
/// even for empty input.
#[derive(Debug)]
pub struct GroupingNode {
    base: NodeBase,
    child: Box<dyn ExecNode>,
    child_rows: BatchIterator,
    /// Group expressions then aggregate arguments.
    projection: Vec<Expression>,
    group_count: usize,
    aggregates: Vec<Box<dyn Aggregate>>,
    specs: Vec<AggregateSpec>,
    phase: Phase,
    current_key: Option<Row>,
    input_rows: usize,
    groups: usize,
}

impl GroupingNode {
    /// Creates a grouping node.
    pub fn new(
        id: NodeId,
        child: Box<dyn ExecNode>,
        group_by: Vec<Expression>,
        specs: Vec<AggregateSpec>,
        ctx: &Arc<CommandContext>,
    ) -> FederaResult<Self> {
        let input = Arc::clone(child.schema());
        let schema = Self::output_schema(&input, &group_by, &specs);
        let group_count = group_by.len();

        let mut projection = group_by;
        let mut aggregates = Vec::with_capacity(specs.len());
        for spec in &specs {
            let (argument, input_type) = match &spec.argument {
                Some(arg) => (arg.clone(), arg.data_type(&input)),
                None if spec.function == AggregateFunction::CountStar => {
                    (Expression::Literal(Value::Boolean(true)), DataType::Boolean)
                }
                None => {
                    return Err(FederaError::invalid_plan(
                        id,
                        format!("{} requires an argument", spec.function),
                    ))
                }
            };
            projection.push(argument);
            aggregates.push(create_aggregate(spec, input_type, ctx.buffer_manager()));
        }

        let intermediate = Arc::new(Schema::new(
            projection
                .iter()
                .enumerate()
                .map(|(i, expr)| Field::nullable(format!("g{i}"), expr.data_type(&input)))
                .collect(),
        ));
        let collector = if group_count > 0 {
            let keys: Vec<usize> = (0..group_count).collect();
            Collector::Sort(SortUtility::new(
                SortMode::Sort,
                ListComparator::ascending(&keys),
                intermediate,
                ctx.buffer_manager(),
            ))
        } else {
            Collector::Buffer(RowCollector::create(
                ctx.buffer_manager(),
                intermediate,
                GROUPING_BUFFER_GROUP,
            )?)
        };

        Ok(Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            child,
            child_rows: BatchIterator::new(),
            projection,
            group_count,
            aggregates,
            specs,
            phase: Phase::Collect(collector),
            current_key: None,
            input_rows: 0,
            groups: 0,
        })
    }

    /// Output schema for the given input, group expressions and aggregates.
    pub fn output_schema(input: &Schema, group_by: &[Expression], specs: &[AggregateSpec]) -> Arc<Schema> {
        let groups = group_by.iter().map(|expr| match expr {
            Expression::Column(c) => input
                .field(*c)
                .cloned()
                .unwrap_or_else(|| Field::nullable(expr.to_string(), expr.data_type(input))),
            _ => Field::nullable(expr.to_string(), expr.data_type(input)),
        });
        let aggregates = specs.iter().map(|spec| spec.output_field(input));
        Arc::new(Schema::new(groups.chain(aggregates).collect()))
    }

    /// Returns the aggregates computed per group.
    pub fn aggregates(&self) -> &[AggregateSpec] {
        &self.specs
    }

    fn collect(&mut self) -> PollResult<()> {
        let Phase::Collect(collector) = &mut self.phase else {
            return Ok(Poll::Ready(()));
        };
        let mut input = Projecting {
            input: NodeRows::new(&mut self.child_rows, self.child.as_mut()),
            expressions: &self.projection,
        };
        let buffer = match collector {
            Collector::Sort(sorter) => {
                let buffer = ready!(sorter.sort(&mut input));
                sorter.close()?;
                buffer
            }
            Collector::Buffer(rows) => {
                ready!(rows.collect(&mut input));
                let Phase::Collect(Collector::Buffer(rows)) =
                    std::mem::replace(&mut self.phase, Phase::Done)
                else {
                    return Err(FederaError::invariant("grouping collector vanished"));
                };
                rows.finish()?
            }
        };
        self.child.close()?;
        self.input_rows = buffer.row_count()?;
        debug!(
            node_id = %self.base.id(),
            rows = self.input_rows,
            sorted = self.group_count > 0,
            "grouping input collected"
        );
        let cursor = buffer.cursor();
        self.phase = Phase::Group { buffer, cursor };
        Ok(Poll::Ready(()))
    }

    fn same_group(&self, key: &Row, row: &Row) -> bool {
        // later group columns change more often
        (0..self.group_count).rev().all(|i| key.value(i) == row.value(i))
    }

    fn emit_group(&mut self, key: Row) -> FederaResult<()> {
        let mut values = key.into_values();
        for aggregate in &mut self.aggregates {
            values.push(aggregate.result()?);
            aggregate.reset()?;
        }
        self.base.add_row(Row::new(values));
        self.groups += 1;
        Ok(())
    }

    fn group(&mut self) -> FederaResult<bool> {
        let keys: Vec<usize> = (0..self.group_count).collect();
        while !self.base.is_batch_full() {
            let Phase::Group { cursor, .. } = &mut self.phase else {
                return Err(FederaError::invariant("grouping node is not grouping"));
            };
            let Some(row) = cursor.next_row()? else {
                match self.current_key.take() {
                    Some(key) => self.emit_group(key)?,
                    None if self.group_count == 0 => self.emit_group(Row::empty())?,
                    None => {}
                }
                return Ok(true);
            };
            let boundary = match &self.current_key {
                Some(key) => !self.same_group(key, &row),
                None => false,
            };
            if boundary {
                if let Some(key) = self.current_key.take() {
                    self.emit_group(key)?;
                }
            }
            if self.current_key.is_none() {
                self.current_key = Some(row.project(&keys));
            }
            for (i, aggregate) in self.aggregates.iter_mut().enumerate() {
                aggregate.add_input(row.value(self.group_count + i))?;
            }
        }
        Ok(false)
    }

    fn release(&mut self) -> FederaResult<()> {
        let phase = match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Collect(Collector::Sort(mut sorter)) => sorter.close(),
            Phase::Collect(Collector::Buffer(rows)) => rows.discard(),
            Phase::Group { mut buffer, .. } => buffer.remove(),
            Phase::Done => Ok(()),
        };
        let mut result = phase;
        for aggregate in &mut self.aggregates {
            result = result.and(aggregate.close());
        }
        result
    }
}

impl ExecNode for GroupingNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Grouping"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        self.child.open()
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        if matches!(self.phase, Phase::Collect(_)) {
            ready!(self.collect());
        }
        if matches!(self.phase, Phase::Group { .. }) && self.group()? {
            debug!(node_id = %self.base.id(), groups = self.groups, "grouping complete");
            self.release()?;
        }
        if matches!(self.phase, Phase::Done) {
            return Ok(Poll::Ready(self.base.terminate_batch()));
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        let child = self.child.close();
        child.and(self.release())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;
    use crate::node::AccessNode;
    use crate::source::{Command, MemoryDataManager};
    use crate::test_util::{buffer_manager, context, context_with, drain, int_schema, values};

    fn letters() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::nullable("k", DataType::String),
            Field::nullable("v", DataType::Int),
        ]))
    }

    fn rows(items: &[(Option<&str>, i32)]) -> Vec<Row> {
        items
            .iter()
            .map(|(k, v)| Row::new(vec![k.map_or(Value::Null, Value::string), Value::Int(*v)]))
            .collect()
    }

    fn sum_by_key(ctx: &Arc<CommandContext>, child: Box<dyn ExecNode>) -> GroupingNode {
        GroupingNode::new(
            NodeId::new(9),
            child,
            vec![col(0)],
            vec![AggregateSpec::new(AggregateFunction::Sum, col(1))],
            ctx,
        )
        .unwrap()
    }

    #[test]
    fn test_sum_by_key_regardless_of_order() {
        let expected = vec![
            Row::new(vec![Value::string("A"), Value::BigInt(3)]),
            Row::new(vec![Value::string("B"), Value::BigInt(5)]),
        ];
        for input in [
            rows(&[(Some("A"), 1), (Some("A"), 2), (Some("B"), 5)]),
            rows(&[(Some("B"), 5), (Some("A"), 2), (Some("A"), 1)]),
            rows(&[(Some("A"), 2), (Some("B"), 5), (Some("A"), 1)]),
        ] {
            let ctx = context(1);
            let mut node = sum_by_key(&ctx, values(1, letters(), input, 1));
            node.open().unwrap();
            assert_eq!(drain(&mut node), expected);
            node.close().unwrap();
            assert_eq!(ctx.buffer_manager().stats().live(), 0);
        }
    }

    #[test]
    fn test_null_keys_form_one_group() {
        let ctx = context(4);
        let input = rows(&[(None, 1), (Some("A"), 2), (None, 4)]);
        let mut node = sum_by_key(&ctx, values(1, letters(), input, 4));
        node.open().unwrap();
        let out = drain(&mut node);
        assert_eq!(
            out,
            vec![
                Row::new(vec![Value::Null, Value::BigInt(5)]),
                Row::new(vec![Value::string("A"), Value::BigInt(2)]),
            ]
        );
        node.close().unwrap();
    }

    #[test]
    fn test_global_aggregate_over_empty_input() {
        let ctx = context(4);
        let mut node = GroupingNode::new(
            NodeId::new(2),
            values(1, int_schema(1), Vec::new(), 4),
            Vec::new(),
            vec![
                AggregateSpec::count_star(),
                AggregateSpec::new(AggregateFunction::Max, col(0)),
            ],
            &ctx,
        )
        .unwrap();
        assert_eq!(node.schema().field(0).map(|f| f.name.as_str()), Some("COUNT(*)"));
        node.open().unwrap();
        assert_eq!(drain(&mut node), vec![Row::new(vec![Value::BigInt(0), Value::Null])]);
        node.close().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
    }

    #[test]
    fn test_count_distinct_per_group() {
        let ctx = context(2);
        let input = rows(&[(Some("A"), 1), (Some("B"), 1), (Some("A"), 1), (Some("A"), 3)]);
        let mut node = GroupingNode::new(
            NodeId::new(2),
            values(1, letters(), input, 2),
            vec![col(0)],
            vec![
                AggregateSpec::new(AggregateFunction::Count, col(1)).distinct(),
                AggregateSpec::count_star(),
            ],
            &ctx,
        )
        .unwrap();
        node.open().unwrap();
        assert_eq!(
            drain(&mut node),
            vec![
                Row::new(vec![Value::string("A"), Value::BigInt(2), Value::BigInt(3)]),
                Row::new(vec![Value::string("B"), Value::BigInt(1), Value::BigInt(1)]),
            ]
        );
        node.close().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
    }

    #[test]
    fn test_suspending_input_gives_same_groups() {
        let data = Arc::new(MemoryDataManager::new().with_suspension(2));
        let input: Vec<Row> = (0..20).map(|i| Row::new(vec![Value::Int(i % 3)])).collect();
        data.register_table("t", int_schema(1), input);
        let ctx = context_with(Arc::clone(&data), buffer_manager(2));
        let command = Command::Query {
            table: "t".into(),
            columns: vec![],
            criteria: None,
        };
        let access = AccessNode::new(NodeId::new(1), int_schema(1), "src".into(), command, &ctx);
        let mut node = GroupingNode::new(
            NodeId::new(2),
            Box::new(access),
            vec![col(0)],
            vec![AggregateSpec::count_star()],
            &ctx,
        )
        .unwrap();
        node.open().unwrap();
        assert_eq!(
            drain(&mut node),
            vec![
                Row::new(vec![Value::Int(0), Value::BigInt(7)]),
                Row::new(vec![Value::Int(1), Value::BigInt(7)]),
                Row::new(vec![Value::Int(2), Value::BigInt(6)]),
            ]
        );
        node.close().unwrap();
        assert_eq!(data.open_streams(), 0);
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
    }

    #[test]
    fn test_close_during_collect() {
        let ctx = context(2);
        let mut node = sum_by_key(&ctx, values(1, letters(), rows(&[(Some("A"), 1)]), 2));
        node.open().unwrap();
        node.close().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
    }
}
