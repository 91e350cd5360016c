//! Row expressions and their evaluator.
//!
//! Expressions address input columns by position. Predicates follow SQL
//! three-valued logic: a comparison involving NULL yields NULL, and a
//! filter keeps a row only when its predicate is TRUE.

use std::fmt;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{DataType, Row, Schema, Value};
use serde::{Deserialize, Serialize};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `||`
    Concat,
}

impl BinaryOp {
    /// Returns true for comparison operators.
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    /// Returns true for `AND` and `OR`.
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Concat => "||",
        };
        write!(f, "{symbol}")
    }
}

/// Where the values of a dependent set come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DependentValues {
    /// A column of rows collected at runtime from a named source.
    Tuples {
        /// Name the independent side registered its rows under.
        source: String,
        /// Column of the collected rows holding the values.
        column: usize,
    },
    /// A fixed collection of literals.
    Literals(Vec<Value>),
}

impl fmt::Display for DependentValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuples { source, column } => write!(f, "{source}.#{column}"),
            Self::Literals(values) => write!(f, "{} literals", values.len()),
        }
    }
}

/// A scalar expression over one input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Input column by position.
    Column(usize),
    /// Constant.
    Literal(Value),
    /// Binary operation.
    Binary {
        /// Left operand.
        left: Box<Expression>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Logical negation.
    Not(Box<Expression>),
    /// Arithmetic negation.
    Negate(Box<Expression>),
    /// `IS [NOT] NULL`
    IsNull {
        /// Tested expression.
        expr: Box<Expression>,
        /// True for `IS NOT NULL`.
        negated: bool,
    },
    /// `[NOT] IN (list)`
    InList {
        /// Tested expression.
        expr: Box<Expression>,
        /// Candidate values.
        list: Vec<Expression>,
        /// True for `NOT IN`.
        negated: bool,
    },
    /// `CAST(expr AS type)`
    Cast {
        /// Converted expression.
        expr: Box<Expression>,
        /// Target type.
        data_type: DataType,
    },
    /// `expr IN (<values supplied at runtime>)`.
    ///
    /// Only valid inside a dependent command; the criteria processor
    /// replaces it with an `InList` before the command is submitted.
    DependentSet {
        /// Tested expression.
        expr: Box<Expression>,
        /// Value source.
        values: DependentValues,
    },
    /// Single value produced by an uncorrelated subquery.
    ScalarSubquery(usize),
    /// `[NOT] EXISTS (subquery)`
    Exists {
        /// Subquery index.
        subquery: usize,
        /// True for `NOT EXISTS`.
        negated: bool,
    },
    /// `expr [NOT] IN (subquery)`
    InSubquery {
        /// Tested expression.
        expr: Box<Expression>,
        /// Subquery index.
        subquery: usize,
        /// True for `NOT IN`.
        negated: bool,
    },
}

/// Column reference.
pub fn col(index: usize) -> Expression {
    Expression::Column(index)
}

/// Literal value.
pub fn lit(value: impl Into<Value>) -> Expression {
    Expression::Literal(value.into())
}

/// `left op right`.
pub fn binary(left: Expression, op: BinaryOp, right: Expression) -> Expression {
    Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// `left = right`.
pub fn eq(left: Expression, right: Expression) -> Expression {
    binary(left, BinaryOp::Eq, right)
}

/// `left AND right`.
pub fn and(left: Expression, right: Expression) -> Expression {
    binary(left, BinaryOp::And, right)
}

impl Expression {
    /// `self IN (<values from source column>)`, filled in at runtime.
    pub fn in_dependent(self, source: impl Into<String>, column: usize) -> Self {
        Self::DependentSet {
            expr: Box::new(self),
            values: DependentValues::Tuples {
                source: source.into(),
                column,
            },
        }
    }

    /// `self IN (<literals>)`, sent in bounded windows.
    pub fn in_literals(self, values: Vec<Value>) -> Self {
        Self::DependentSet {
            expr: Box::new(self),
            values: DependentValues::Literals(values),
        }
    }

    /// Returns the direct sub-expressions.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Self::Column(_) | Self::Literal(_) | Self::ScalarSubquery(_) | Self::Exists { .. } => {
                Vec::new()
            }
            Self::Binary { left, right, .. } => vec![left, right],
            Self::Not(e) | Self::Negate(e) => vec![e],
            Self::IsNull { expr, .. }
            | Self::Cast { expr, .. }
            | Self::DependentSet { expr, .. }
            | Self::InSubquery { expr, .. } => vec![expr],
            Self::InList { expr, list, .. } => {
                let mut children = vec![expr.as_ref()];
                children.extend(list.iter());
                children
            }
        }
    }

    /// Returns the dependent sets in pre-order.
    ///
    /// The position of a set in this list is its identity for
    /// [`Expression::replace_dependent_sets`].
    pub fn dependent_sets(&self) -> Vec<(&Expression, &DependentValues)> {
        let mut out = Vec::new();
        self.collect_dependent_sets(&mut out);
        out
    }

    fn collect_dependent_sets<'a>(&'a self, out: &mut Vec<(&'a Expression, &'a DependentValues)>) {
        if let Self::DependentSet { expr, values } = self {
            out.push((expr.as_ref(), values));
        }
        for child in self.children() {
            child.collect_dependent_sets(out);
        }
    }

    /// Returns true if the expression contains a dependent set.
    pub fn has_dependent_sets(&self) -> bool {
        matches!(self, Self::DependentSet { .. })
            || self.children().iter().any(|c| c.has_dependent_sets())
    }

    /// Replaces the n-th dependent set (pre-order) with `IN (values[n])`.
    pub fn replace_dependent_sets(&self, values: &[Vec<Value>]) -> FederaResult<Expression> {
        let mut next = 0;
        let rewritten = self.rewrite(values, &mut next)?;
        if next != values.len() {
            return Err(FederaError::invariant(format!(
                "{} dependent value windows supplied for {next} dependent sets",
                values.len()
            )));
        }
        Ok(rewritten)
    }

    fn rewrite(&self, values: &[Vec<Value>], next: &mut usize) -> FederaResult<Expression> {
        let boxed = |e: &Expression, next: &mut usize| -> FederaResult<Box<Expression>> {
            Ok(Box::new(e.rewrite(values, next)?))
        };
        Ok(match self {
            Self::DependentSet { expr, .. } => {
                let index = *next;
                *next += 1;
                let window = values.get(index).ok_or_else(|| {
                    FederaError::invariant(format!("no values supplied for dependent set {index}"))
                })?;
                Self::InList {
                    expr: boxed(expr, next)?,
                    list: window.iter().cloned().map(Self::Literal).collect(),
                    negated: false,
                }
            }
            Self::Column(_) | Self::Literal(_) | Self::ScalarSubquery(_) | Self::Exists { .. } => {
                self.clone()
            }
            Self::Binary { left, op, right } => Self::Binary {
                left: boxed(left, next)?,
                op: *op,
                right: boxed(right, next)?,
            },
            Self::Not(e) => Self::Not(boxed(e, next)?),
            Self::Negate(e) => Self::Negate(boxed(e, next)?),
            Self::IsNull { expr, negated } => Self::IsNull {
                expr: boxed(expr, next)?,
                negated: *negated,
            },
            Self::InList {
                expr,
                list,
                negated,
            } => Self::InList {
                expr: boxed(expr, next)?,
                list: list
                    .iter()
                    .map(|e| e.rewrite(values, next))
                    .collect::<FederaResult<_>>()?,
                negated: *negated,
            },
            Self::Cast { expr, data_type } => Self::Cast {
                expr: boxed(expr, next)?,
                data_type: *data_type,
            },
            Self::InSubquery {
                expr,
                subquery,
                negated,
            } => Self::InSubquery {
                expr: boxed(expr, next)?,
                subquery: *subquery,
                negated: *negated,
            },
        })
    }

    /// Returns the largest subquery index referenced, if any.
    pub fn max_subquery(&self) -> Option<usize> {
        let own = match self {
            Self::ScalarSubquery(s) => Some(*s),
            Self::Exists { subquery, .. } | Self::InSubquery { subquery, .. } => Some(*subquery),
            _ => None,
        };
        self.children()
            .into_iter()
            .filter_map(Expression::max_subquery)
            .chain(own)
            .max()
    }

    /// Returns the largest column index referenced, if any.
    pub fn max_column(&self) -> Option<usize> {
        let own = match self {
            Self::Column(c) => Some(*c),
            _ => None,
        };
        self.children()
            .into_iter()
            .filter_map(Expression::max_column)
            .chain(own)
            .max()
    }

    /// Infers the result type against an input schema.
    pub fn data_type(&self, schema: &Schema) -> DataType {
        match self {
            Self::Column(c) => schema
                .field(*c)
                .map(|f| f.data_type)
                .unwrap_or(DataType::String),
            Self::Literal(v) => v.data_type().unwrap_or(DataType::String),
            Self::Binary { left, op, right } => {
                if op.is_comparison() || op.is_logical() {
                    DataType::Boolean
                } else if *op == BinaryOp::Concat {
                    DataType::String
                } else {
                    let (l, r) = (left.data_type(schema), right.data_type(schema));
                    if l == DataType::Double || r == DataType::Double || *op == BinaryOp::Divide
                    {
                        DataType::Double
                    } else {
                        DataType::BigInt
                    }
                }
            }
            Self::Negate(e) => e.data_type(schema),
            Self::Cast { data_type, .. } => *data_type,
            Self::ScalarSubquery(_) => DataType::String,
            Self::Not(_)
            | Self::IsNull { .. }
            | Self::InList { .. }
            | Self::DependentSet { .. }
            | Self::Exists { .. }
            | Self::InSubquery { .. } => DataType::Boolean,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => write!(f, "#{c}"),
            Self::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Binary { left, op, right } => write!(f, "({left} {op} {right})"),
            Self::Not(e) => write!(f, "NOT {e}"),
            Self::Negate(e) => write!(f, "-{e}"),
            Self::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Self::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type})"),
            Self::DependentSet { expr, values } => write!(f, "{expr} IN <{values}>"),
            Self::ScalarSubquery(s) => write!(f, "$subquery{s}"),
            Self::Exists { subquery, negated } => {
                write!(f, "{}EXISTS $subquery{subquery}", if *negated { "NOT " } else { "" })
            }
            Self::InSubquery {
                expr,
                subquery,
                negated,
            } => write!(
                f,
                "{expr} {}IN $subquery{subquery}",
                if *negated { "NOT " } else { "" }
            ),
        }
    }
}

/// Evaluates an expression that references no subqueries.
pub fn evaluate(expr: &Expression, row: &Row) -> FederaResult<Value> {
    evaluate_with(expr, row, &[])
}

/// Evaluates an expression with the results of its subqueries.
///
/// `subqueries[i]` holds every row produced by subquery `i`.
pub fn evaluate_with(expr: &Expression, row: &Row, subqueries: &[Vec<Row>]) -> FederaResult<Value> {
    match expr {
        Expression::Column(c) => row.get(*c).cloned().ok_or_else(|| {
            FederaError::evaluation(format!("column #{c} out of range for {} columns", row.len()))
        }),
        Expression::Literal(v) => Ok(v.clone()),
        Expression::Binary { left, op, right } => {
            let l = evaluate_with(left, row, subqueries)?;
            // AND/OR may short-circuit without evaluating the right side
            match (op, l.to_bool()) {
                (BinaryOp::And, Some(false)) => return Ok(Value::Boolean(false)),
                (BinaryOp::Or, Some(true)) => return Ok(Value::Boolean(true)),
                _ => {}
            }
            let r = evaluate_with(right, row, subqueries)?;
            evaluate_binary(*op, &l, &r)
        }
        Expression::Not(e) => {
            let v = evaluate_with(e, row, subqueries)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let b = v
                .to_bool()
                .ok_or_else(|| FederaError::evaluation(format!("NOT applied to {v}")))?;
            Ok(Value::Boolean(!b))
        }
        Expression::Negate(e) => match evaluate_with(e, row, subqueries)? {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => Ok(Value::Int(i.checked_neg().ok_or_else(overflow)?)),
            Value::BigInt(i) => Ok(Value::BigInt(i.checked_neg().ok_or_else(overflow)?)),
            Value::Double(d) => Ok(Value::Double(-d)),
            other => Err(FederaError::evaluation(format!("cannot negate {other}"))),
        },
        Expression::IsNull { expr, negated } => {
            let v = evaluate_with(expr, row, subqueries)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let v = evaluate_with(expr, row, subqueries)?;
            let candidates = list
                .iter()
                .map(|e| evaluate_with(e, row, subqueries))
                .collect::<FederaResult<Vec<_>>>()?;
            Ok(in_values(&v, candidates.iter(), *negated))
        }
        Expression::Cast { expr, data_type } => evaluate_with(expr, row, subqueries)?
            .cast(*data_type)
            .map_err(FederaError::evaluation),
        Expression::DependentSet { values, .. } => Err(FederaError::component(format!(
            "dependent set over {values} evaluated before being rewritten"
        ))),
        Expression::ScalarSubquery(s) => {
            let rows = subquery_rows(subqueries, *s)?;
            match rows.len() {
                0 => Ok(Value::Null),
                1 => Ok(rows[0].value(0).clone()),
                n => Err(FederaError::processing(format!(
                    "scalar subquery {s} returned {n} rows"
                ))),
            }
        }
        Expression::Exists { subquery, negated } => {
            let rows = subquery_rows(subqueries, *subquery)?;
            Ok(Value::Boolean(rows.is_empty() == *negated))
        }
        Expression::InSubquery {
            expr,
            subquery,
            negated,
        } => {
            let v = evaluate_with(expr, row, subqueries)?;
            let rows = subquery_rows(subqueries, *subquery)?;
            Ok(in_values(&v, rows.iter().map(|r| r.value(0)), *negated))
        }
    }
}

/// Evaluates a predicate; only TRUE keeps the row.
pub fn evaluate_predicate(expr: &Expression, row: &Row, subqueries: &[Vec<Row>]) -> FederaResult<bool> {
    Ok(evaluate_with(expr, row, subqueries)?.to_bool() == Some(true))
}

fn subquery_rows(subqueries: &[Vec<Row>], index: usize) -> FederaResult<&[Row]> {
    subqueries
        .get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| FederaError::component(format!("subquery {index} has not been evaluated")))
}

/// SQL `IN`: TRUE on a match, NULL if no match but a NULL was seen.
fn in_values<'a>(value: &Value, candidates: impl Iterator<Item = &'a Value>, negated: bool) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let mut saw_null = false;
    for candidate in candidates {
        if candidate.is_null() {
            saw_null = true;
        } else if candidate == value {
            return Value::Boolean(!negated);
        }
    }
    if saw_null {
        Value::Null
    } else {
        Value::Boolean(negated)
    }
}

fn overflow() -> FederaError {
    FederaError::evaluation("numeric overflow")
}

fn evaluate_binary(op: BinaryOp, left: &Value, right: &Value) -> FederaResult<Value> {
    match op {
        BinaryOp::And => {
            return Ok(match (left.to_bool(), right.to_bool()) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        BinaryOp::Or => {
            return Ok(match (left.to_bool(), right.to_bool()) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Eq => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEq => Ok(Value::Boolean(left != right)),
        BinaryOp::Lt => Ok(Value::Boolean(left < right)),
        BinaryOp::LtEq => Ok(Value::Boolean(left <= right)),
        BinaryOp::Gt => Ok(Value::Boolean(left > right)),
        BinaryOp::GtEq => Ok(Value::Boolean(left >= right)),
        BinaryOp::Plus => arithmetic(left, right, i64::checked_add, |a, b| a + b),
        BinaryOp::Minus => arithmetic(left, right, i64::checked_sub, |a, b| a - b),
        BinaryOp::Multiply => arithmetic(left, right, i64::checked_mul, |a, b| a * b),
        BinaryOp::Divide => {
            if right.to_f64() == Some(0.0) {
                return Err(FederaError::evaluation("division by zero"));
            }
            let l = numeric(left)?;
            let r = numeric(right)?;
            Ok(Value::Double(l / r))
        }
        BinaryOp::Modulo => {
            let l = integer(left)?;
            let r = integer(right)?;
            if r == 0 {
                return Err(FederaError::evaluation("division by zero"));
            }
            Ok(Value::BigInt(l.checked_rem(r).ok_or_else(overflow)?))
        }
        BinaryOp::Concat => {
            let l = left.to_string_value().unwrap_or_default();
            let r = right.to_string_value().unwrap_or_default();
            Ok(Value::String(format!("{l}{r}")))
        }
        BinaryOp::And | BinaryOp::Or => Err(FederaError::invariant(format!(
            "logical operator {op} reached value evaluation"
        ))),
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> FederaResult<Value> {
    match (left, right) {
        (Value::Double(_), _) | (_, Value::Double(_)) => {
            Ok(Value::Double(float_op(numeric(left)?, numeric(right)?)))
        }
        _ => {
            let l = integer(left)?;
            let r = integer(right)?;
            Ok(Value::BigInt(int_op(l, r).ok_or_else(overflow)?))
        }
    }
}

fn numeric(value: &Value) -> FederaResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| FederaError::evaluation(format!("expected a number, found {value}")))
}

fn integer(value: &Value) -> FederaResult<i64> {
    match value {
        Value::Int(_) | Value::BigInt(_) => value
            .to_i64()
            .ok_or_else(|| FederaError::evaluation(format!("expected an integer, found {value}"))),
        other => Err(FederaError::evaluation(format!(
            "expected an integer, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_common::row;

    #[test]
    fn test_column_and_literal() {
        let r = row![1, "a"];
        assert_eq!(evaluate(&col(1), &r).unwrap(), Value::string("a"));
        assert_eq!(evaluate(&lit(5), &r).unwrap(), Value::Int(5));
        assert!(evaluate(&col(7), &r).is_err());
    }

    #[test]
    fn test_comparison_with_null_is_null() {
        let r = Row::new(vec![Value::Null, Value::Int(1)]);
        assert_eq!(evaluate(&eq(col(0), col(1)), &r).unwrap(), Value::Null);
        assert!(!evaluate_predicate(&eq(col(0), col(1)), &r, &[]).unwrap());
        let null_check = Expression::IsNull {
            expr: Box::new(col(0)),
            negated: false,
        };
        assert_eq!(evaluate(&null_check, &r).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_three_valued_and_or() {
        let r = Row::new(vec![Value::Null]);
        let t = lit(true);
        let f = lit(false);
        assert_eq!(evaluate(&and(col(0), f.clone()), &r).unwrap(), Value::Boolean(false));
        assert_eq!(evaluate(&and(col(0), t.clone()), &r).unwrap(), Value::Null);
        assert_eq!(
            evaluate(&binary(col(0), BinaryOp::Or, t), &r).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(evaluate(&binary(col(0), BinaryOp::Or, f), &r).unwrap(), Value::Null);
    }

    #[test]
    fn test_arithmetic() {
        let r = row![7, 2];
        assert_eq!(
            evaluate(&binary(col(0), BinaryOp::Plus, col(1)), &r).unwrap(),
            Value::BigInt(9)
        );
        assert_eq!(
            evaluate(&binary(col(0), BinaryOp::Modulo, col(1)), &r).unwrap(),
            Value::BigInt(1)
        );
        assert_eq!(
            evaluate(&binary(col(0), BinaryOp::Divide, col(1)), &r).unwrap(),
            Value::Double(3.5)
        );
        let err = evaluate(&binary(col(0), BinaryOp::Divide, lit(0)), &r).unwrap_err();
        assert!(err.is_processing());
        let big = Row::new(vec![Value::BigInt(i64::MAX)]);
        assert!(evaluate(&binary(col(0), BinaryOp::Plus, lit(1)), &big).is_err());
    }

    #[test]
    fn test_in_list_null_semantics() {
        let list = |items: Vec<Expression>, negated| Expression::InList {
            expr: Box::new(col(0)),
            list: items,
            negated,
        };
        let r = row![2];
        assert_eq!(
            evaluate(&list(vec![lit(1), lit(2)], false), &r).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            evaluate(&list(vec![lit(1), lit(Value::Null)], false), &r).unwrap(),
            Value::Null
        );
        assert_eq!(
            evaluate(&list(vec![lit(1)], true), &r).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_dependent_set_rewrite() {
        let predicate = and(
            col(0).in_dependent("left", 0),
            col(1).in_literals(vec![Value::Int(1), Value::Int(2)]),
        );
        assert!(predicate.has_dependent_sets());
        let sets = predicate.dependent_sets();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].0, &col(0));

        // not rewritten yet
        assert!(evaluate(&predicate, &row![1, 1]).unwrap_err().is_component());

        let rewritten = predicate
            .replace_dependent_sets(&[vec![Value::Int(5)], vec![Value::Int(1)]])
            .unwrap();
        assert!(!rewritten.has_dependent_sets());
        assert!(evaluate_predicate(&rewritten, &row![5, 1], &[]).unwrap());
        assert!(!evaluate_predicate(&rewritten, &row![5, 2], &[]).unwrap());
        assert!(predicate.replace_dependent_sets(&[vec![]]).is_err());
    }

    #[test]
    fn test_subquery_expressions() {
        let subqueries = vec![vec![row![10]], Vec::new(), vec![row![1], row![2]]];
        let r = row![2];
        assert_eq!(
            evaluate_with(&Expression::ScalarSubquery(0), &r, &subqueries).unwrap(),
            Value::Int(10)
        );
        assert_eq!(
            evaluate_with(&Expression::ScalarSubquery(1), &r, &subqueries).unwrap(),
            Value::Null
        );
        assert!(evaluate_with(&Expression::ScalarSubquery(2), &r, &subqueries)
            .unwrap_err()
            .is_processing());
        let exists = Expression::Exists {
            subquery: 1,
            negated: true,
        };
        assert_eq!(
            evaluate_with(&exists, &r, &subqueries).unwrap(),
            Value::Boolean(true)
        );
        let in_sub = Expression::InSubquery {
            expr: Box::new(col(0)),
            subquery: 2,
            negated: false,
        };
        assert!(evaluate_predicate(&in_sub, &r, &subqueries).unwrap());
        assert_eq!(in_sub.max_subquery(), Some(2));
    }

    #[test]
    fn test_display() {
        let e = and(eq(col(0), lit("x")), col(1).in_dependent("src", 0));
        assert_eq!(e.to_string(), "((#0 = 'x') AND #1 IN <src.#0>)");
    }
}
