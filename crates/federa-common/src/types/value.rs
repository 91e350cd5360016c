//! Runtime values.
//!
//! This module defines the `Value` type which represents a single typed
//! value flowing through execution nodes.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::DataType;

/// Placement of NULL relative to non-null values when ranking.
///
/// Ranking is independent of equality: grouping comparisons treat two
/// NULLs as equal regardless of the ordering chosen here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullOrdering {
    /// NULL ranks below every non-null value.
    #[default]
    Low,
    /// NULL ranks above every non-null value.
    High,
}

/// A runtime value during query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// String value.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Date (days since epoch).
    Date(i32),
    /// Timestamp (microseconds since epoch).
    Timestamp(i64),
}

impl Value {
    /// Creates a NULL value.
    #[must_use]
    pub const fn null() -> Self {
        Value::Null
    }

    /// Creates a boolean value.
    #[must_use]
    pub const fn boolean(v: bool) -> Self {
        Value::Boolean(v)
    }

    /// Creates an integer value.
    #[must_use]
    pub const fn int(v: i32) -> Self {
        Value::Int(v)
    }

    /// Creates a bigint value.
    #[must_use]
    pub const fn bigint(v: i64) -> Self {
        Value::BigInt(v)
    }

    /// Creates a double value.
    #[must_use]
    pub const fn double(v: f64) -> Self {
        Value::Double(v)
    }

    /// Creates a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Value::String(v.into())
    }

    /// Returns true if this value is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value is numeric.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::BigInt(_) | Value::Double(_))
    }

    /// Converts this value to a boolean, or `None` for NULL.
    #[must_use]
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::BigInt(i) => Some(*i != 0),
            Value::Double(f) => Some(*f != 0.0),
            Value::String(s) => Some(!s.is_empty()),
            Value::Bytes(b) => Some(!b.is_empty()),
            Value::Date(_) | Value::Timestamp(_) => Some(true),
        }
    }

    /// Converts this value to an i64.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Null | Value::Bytes(_) => None,
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Value::Double(f) => Some(*f as i64),
            Value::String(s) => s.parse().ok(),
            Value::Date(d) => Some(i64::from(*d)),
            Value::Timestamp(t) => Some(*t),
        }
    }

    /// Converts this value to an f64.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Null | Value::Bytes(_) | Value::Date(_) | Value::Timestamp(_) => None,
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(f64::from(*i)),
            Value::BigInt(i) => Some(*i as f64),
            Value::Double(f) => Some(*f),
            Value::String(s) => s.parse().ok(),
        }
    }

    /// Converts this value to a string, or `None` for NULL.
    #[must_use]
    pub fn to_string_value(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Returns the data type of this value, or `None` for NULL.
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int(_) => Some(DataType::Int),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::Double(_) => Some(DataType::Double),
            Value::String(_) => Some(DataType::String),
            Value::Bytes(_) => Some(DataType::Bytes),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    /// Casts this value to the specified type.
    pub fn cast(&self, target: DataType) -> Result<Value, String> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let converted = match target {
            DataType::Boolean => self.to_bool().map(Value::Boolean),
            DataType::Int => self
                .to_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int),
            DataType::BigInt => self.to_i64().map(Value::BigInt),
            DataType::Double => self.to_f64().map(Value::Double),
            DataType::String => self.to_string_value().map(Value::String),
            DataType::Date => self
                .to_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Date),
            DataType::Timestamp => self.to_i64().map(Value::Timestamp),
            DataType::Bytes => match self {
                Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                Value::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
        };
        converted.ok_or_else(|| format!("cannot cast {self} to {target}"))
    }

    /// Compares two values placing NULL according to `nulls`.
    #[must_use]
    pub fn compare_with_nulls(&self, other: &Value, nulls: NullOrdering) -> Ordering {
        match (self.is_null(), other.is_null(), nulls) {
            (true, true, _) => Ordering::Equal,
            (true, false, NullOrdering::Low) | (false, true, NullOrdering::High) => Ordering::Less,
            (true, false, NullOrdering::High) | (false, true, NullOrdering::Low) => {
                Ordering::Greater
            }
            (false, false, _) => self.cmp(other),
        }
    }

    /// Rank of the value's type family, used to order unrelated types.
    const fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int(_) | Value::BigInt(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
            Value::Date(_) => 5,
            Value::Timestamp(_) => 6,
        }
    }

    /// Exact integer view of a numeric value, if it has one.
    fn as_exact_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            Value::Double(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => Some(*f as i64),
            _ => None,
        }
    }
}

/// Compares two numeric values, exactly when both have integer views.
fn compare_numeric(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_exact_i64(), b.as_exact_i64()) {
        return x.cmp(&y);
    }
    let x = a.to_f64().unwrap_or(f64::NAN);
    let y = b.to_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NULL is considered less than any non-NULL value
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,

            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => compare_numeric(a, b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),

            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Int(_) | Value::BigInt(_) | Value::Double(_) => match self.as_exact_i64() {
                Some(i) => i.hash(state),
                None => self.to_f64().map(f64::to_bits).hash(state),
            },
            Value::String(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::BigInt(i) => write!(f, "{i}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Date(d) => write!(f, "date:{d}"),
            Value::Timestamp(t) => write!(f, "ts:{t}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
