//! Aggregate accumulators.

use std::fmt;
use std::sync::Arc;

use federa_buffer::BufferManager;
use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{DataType, Field, Row, Schema, Value};
use serde::{Deserialize, Serialize};

use crate::buffer::TupleBuffer;
use crate::expr::Expression;
use crate::poll::expect_ready;
use crate::rows::VecSource;
use crate::sort::{ListComparator, SortMode, SortUtility};

const DISTINCT_BUFFER_GROUP: &str = "distinct-aggregate";

/// Aggregate function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Number of non-null inputs.
    Count,
    /// Number of input rows.
    CountStar,
    /// Sum of non-null inputs.
    Sum,
    /// Average of non-null inputs.
    Avg,
    /// Smallest non-null input.
    Min,
    /// Largest non-null input.
    Max,
}

impl AggregateFunction {
    /// Returns the result type for an input of type `input`.
    pub fn result_type(self, input: DataType) -> DataType {
        match self {
            Self::Count | Self::CountStar => DataType::BigInt,
            Self::Avg => DataType::Double,
            Self::Sum => match input {
                DataType::Double => DataType::Double,
                _ => DataType::BigInt,
            },
            Self::Min | Self::Max => input,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Count | Self::CountStar => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        };
        write!(f, "{name}")
    }
}

/// One aggregate of a grouping node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Function.
    pub function: AggregateFunction,
    /// Input expression over the grouping node's input; `None` for
    /// `COUNT(*)`.
    pub argument: Option<Expression>,
    /// Ignore duplicate inputs.
    pub distinct: bool,
}

impl AggregateSpec {
    /// Creates an aggregate of `function` over `argument`.
    pub fn new(function: AggregateFunction, argument: Expression) -> Self {
        Self {
            function,
            argument: Some(argument),
            distinct: false,
        }
    }

    /// `COUNT(*)`.
    pub fn count_star() -> Self {
        Self {
            function: AggregateFunction::CountStar,
            argument: None,
            distinct: false,
        }
    }

    /// Makes the aggregate ignore duplicate inputs.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Returns the output field for an input schema.
    pub fn output_field(&self, input: &Schema) -> Field {
        let input_type = self
            .argument
            .as_ref()
            .map_or(DataType::BigInt, |arg| arg.data_type(input));
        let name = match &self.argument {
            None => format!("{}(*)", self.function),
            Some(arg) if self.distinct => format!("{}(DISTINCT {arg})", self.function),
            Some(arg) => format!("{}({arg})", self.function),
        };
        // only the counts are defined over empty input
        match self.function {
            AggregateFunction::Count | AggregateFunction::CountStar => {
                Field::not_null(name, DataType::BigInt)
            }
            f => Field::nullable(name, f.result_type(input_type)),
        }
    }
}

impl fmt::Display for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            None => write!(f, "{}(*)", self.function),
            Some(arg) if self.distinct => write!(f, "{}(DISTINCT {arg})", self.function),
            Some(arg) => write!(f, "{}({arg})", self.function),
        }
    }
}

/// An accumulator for one aggregate of one group.
pub trait Aggregate: fmt::Debug {
    /// Adds one input value.
    fn add_input(&mut self, value: &Value) -> FederaResult<()>;

    /// Returns the aggregate over every input since the last reset.
    fn result(&mut self) -> FederaResult<Value>;

    /// Starts a new group.
    fn reset(&mut self) -> FederaResult<()>;

    /// Releases held resources.
    fn close(&mut self) -> FederaResult<()> {
        Ok(())
    }
}

/// Builds the accumulator chain for `spec`: the function, wrapped in a
/// NULL filter, wrapped in a duplicate filter when the aggregate is
/// distinct.
pub fn create_aggregate(
    spec: &AggregateSpec,
    input_type: DataType,
    manager: &Arc<dyn BufferManager>,
) -> Box<dyn Aggregate> {
    let function: Box<dyn Aggregate> = match spec.function {
        AggregateFunction::Count | AggregateFunction::CountStar => Box::new(Count::default()),
        AggregateFunction::Sum => Box::new(Sum::default()),
        AggregateFunction::Avg => Box::new(Avg::default()),
        AggregateFunction::Min => Box::new(Extreme::min()),
        AggregateFunction::Max => Box::new(Extreme::max()),
    };
    if spec.function == AggregateFunction::CountStar {
        return function;
    }
    let filtered: Box<dyn Aggregate> = Box::new(NullFilter::new(function));
    if spec.distinct {
        Box::new(DistinctFilter::new(filtered, input_type, manager))
    } else {
        filtered
    }
}

/// Counts inputs.
#[derive(Debug, Default)]
pub struct Count {
    count: i64,
}

impl Aggregate for Count {
    fn add_input(&mut self, _value: &Value) -> FederaResult<()> {
        self.count += 1;
        Ok(())
    }

    fn result(&mut self) -> FederaResult<Value> {
        Ok(Value::BigInt(self.count))
    }

    fn reset(&mut self) -> FederaResult<()> {
        self.count = 0;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
enum Total {
    #[default]
    Empty,
    Integer(i64),
    Float(f64),
}

impl Total {
    fn add(self, value: &Value) -> FederaResult<Self> {
        let total = match (self, value) {
            (_, Value::Null) => self,
            (Self::Empty, Value::Double(v)) => Self::Float(*v),
            (Self::Empty, v) => Self::Integer(integer_input(v)?),
            (Self::Integer(sum), Value::Double(v)) => Self::Float(sum as f64 + v),
            (Self::Integer(sum), v) => Self::Integer(
                sum.checked_add(integer_input(v)?)
                    .ok_or_else(|| FederaError::evaluation("integer overflow in SUM"))?,
            ),
            (Self::Float(sum), v) => Self::Float(
                sum + v
                    .to_f64()
                    .ok_or_else(|| FederaError::evaluation(format!("cannot add {v}")))?,
            ),
        };
        Ok(total)
    }

    fn to_f64(self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Integer(v) => Some(v as f64),
            Self::Float(v) => Some(v),
        }
    }
}

fn integer_input(value: &Value) -> FederaResult<i64> {
    match value {
        Value::Int(_) | Value::BigInt(_) => value
            .to_i64()
            .ok_or_else(|| FederaError::evaluation(format!("cannot add {value}"))),
        other => Err(FederaError::evaluation(format!(
            "cannot aggregate non-numeric value {other}"
        ))),
    }
}

/// Sums inputs; integer sums fail on overflow.
#[derive(Debug, Default)]
pub struct Sum {
    total: Total,
}

impl Aggregate for Sum {
    fn add_input(&mut self, value: &Value) -> FederaResult<()> {
        self.total = self.total.add(value)?;
        Ok(())
    }

    fn result(&mut self) -> FederaResult<Value> {
        Ok(match self.total {
            Total::Empty => Value::Null,
            Total::Integer(v) => Value::BigInt(v),
            Total::Float(v) => Value::Double(v),
        })
    }

    fn reset(&mut self) -> FederaResult<()> {
        self.total = Total::Empty;
        Ok(())
    }
}

/// Averages inputs as a double.
#[derive(Debug, Default)]
pub struct Avg {
    total: Total,
    count: u64,
}

impl Aggregate for Avg {
    fn add_input(&mut self, value: &Value) -> FederaResult<()> {
        self.total = self.total.add(value)?;
        self.count += 1;
        Ok(())
    }

    fn result(&mut self) -> FederaResult<Value> {
        Ok(match self.total.to_f64() {
            Some(total) if self.count > 0 => Value::Double(total / self.count as f64),
            _ => Value::Null,
        })
    }

    fn reset(&mut self) -> FederaResult<()> {
        self.total = Total::Empty;
        self.count = 0;
        Ok(())
    }
}

/// Keeps the smallest or the largest input.
#[derive(Debug)]
pub struct Extreme {
    keep_larger: bool,
    current: Option<Value>,
}

impl Extreme {
    /// `MIN`.
    pub fn min() -> Self {
        Self {
            keep_larger: false,
            current: None,
        }
    }

    /// `MAX`.
    pub fn max() -> Self {
        Self {
            keep_larger: true,
            current: None,
        }
    }
}

impl Aggregate for Extreme {
    fn add_input(&mut self, value: &Value) -> FederaResult<()> {
        let replace = match &self.current {
            None => true,
            Some(current) if self.keep_larger => value > current,
            Some(current) => value < current,
        };
        if replace {
            self.current = Some(value.clone());
        }
        Ok(())
    }

    fn result(&mut self) -> FederaResult<Value> {
        Ok(self.current.clone().unwrap_or(Value::Null))
    }

    fn reset(&mut self) -> FederaResult<()> {
        self.current = None;
        Ok(())
    }
}

/// Drops NULL inputs before they reach the wrapped aggregate.
#[derive(Debug)]
pub struct NullFilter {
    inner: Box<dyn Aggregate>,
}

impl NullFilter {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn Aggregate>) -> Self {
        Self { inner }
    }
}

impl Aggregate for NullFilter {
    fn add_input(&mut self, value: &Value) -> FederaResult<()> {
        if value.is_null() {
            return Ok(());
        }
        self.inner.add_input(value)
    }

    fn result(&mut self) -> FederaResult<Value> {
        self.inner.result()
    }

    fn reset(&mut self) -> FederaResult<()> {
        self.inner.reset()
    }

    fn close(&mut self) -> FederaResult<()> {
        self.inner.close()
    }
}

/// Passes each distinct input once to the wrapped aggregate.
///
/// Inputs of a group are staged in memory up to one sort window, then
/// spilled to a buffer. When the result is requested they run through a
/// duplicate-removing sort of their own.
#[derive(Debug)]
pub struct DistinctFilter {
    inner: Box<dyn Aggregate>,
    schema: Arc<Schema>,
    manager: Arc<dyn BufferManager>,
    staged: Vec<Row>,
    window_rows: usize,
    spill: Option<TupleBuffer>,
    sorter: Option<SortUtility>,
}

impl DistinctFilter {
    /// Wraps `inner`, deduplicating inputs of type `input_type`.
    pub fn new(inner: Box<dyn Aggregate>, input_type: DataType, manager: &Arc<dyn BufferManager>) -> Self {
        let window_rows = manager.processor_batch_size().max(1) * manager.max_processing_batches().max(1);
        Self {
            inner,
            schema: Arc::new(Schema::new(vec![Field::nullable("value", input_type)])),
            manager: Arc::clone(manager),
            staged: Vec::new(),
            window_rows,
            spill: None,
            sorter: None,
        }
    }

    fn spill_staged(&mut self) -> FederaResult<()> {
        if self.spill.is_none() {
            self.spill = Some(TupleBuffer::create(
                &self.manager,
                Arc::clone(&self.schema),
                DISTINCT_BUFFER_GROUP,
            )?);
        }
        match &self.spill {
            Some(spill) => spill.append(std::mem::take(&mut self.staged)),
            None => Ok(()),
        }
    }

    fn release(&mut self) -> FederaResult<()> {
        self.staged.clear();
        let spill = match self.spill.take() {
            Some(mut spill) => spill.remove(),
            None => Ok(()),
        };
        let sorter = match self.sorter.take() {
            Some(mut sorter) => sorter.close(),
            None => Ok(()),
        };
        spill.and(sorter)
    }
}

impl Aggregate for DistinctFilter {
    fn add_input(&mut self, value: &Value) -> FederaResult<()> {
        self.staged.push(Row::new(vec![value.clone()]));
        if self.staged.len() >= self.window_rows {
            self.spill_staged()?;
        }
        Ok(())
    }

    fn result(&mut self) -> FederaResult<Value> {
        if self.spill.is_some() && !self.staged.is_empty() {
            self.spill_staged()?;
        }
        let sorter = self.sorter.insert(SortUtility::new(
            SortMode::DistinctOnly,
            ListComparator::default(),
            Arc::clone(&self.schema),
            &self.manager,
        ));
        match &self.spill {
            Some(spill) => {
                let mut input = spill.cursor();
                expect_ready(sorter.stream_distinct(&mut input), "distinct aggregate input")?;
            }
            None => {
                let mut input = VecSource::new(std::mem::take(&mut self.staged));
                expect_ready(sorter.stream_distinct(&mut input), "distinct aggregate input")?;
            }
        }
        if let Some(mut spill) = self.spill.take() {
            spill.remove()?;
        }
        if let Some(output) = sorter.output() {
            let mut unique = output.cursor();
            while let Some(row) = unique.next_row()? {
                self.inner.add_input(row.value(0))?;
            }
        }
        self.inner.result()
    }

    fn reset(&mut self) -> FederaResult<()> {
        let released = self.release();
        self.inner.reset().and(released)
    }

    fn close(&mut self) -> FederaResult<()> {
        let released = self.release();
        self.inner.close().and(released)
    }
}
