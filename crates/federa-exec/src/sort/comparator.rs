//! Row comparison.

use std::cmp::Ordering;

use federa_common::types::{NullOrdering, Row};
use serde::{Deserialize, Serialize};

/// One ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Column position.
    pub column: usize,
    /// Ascending when true.
    pub ascending: bool,
    /// Where NULL ranks relative to other values.
    pub null_ordering: NullOrdering,
}

impl SortKey {
    /// Ascending key with NULLs low.
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            ascending: true,
            null_ordering: NullOrdering::Low,
        }
    }

    /// Descending key with NULLs low.
    pub fn desc(column: usize) -> Self {
        Self {
            column,
            ascending: false,
            null_ordering: NullOrdering::Low,
        }
    }

    /// Sets the NULL ranking.
    pub fn with_nulls(mut self, null_ordering: NullOrdering) -> Self {
        self.null_ordering = null_ordering;
        self
    }
}

/// Compares rows on a list of sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListComparator {
    keys: Vec<SortKey>,
}

impl ListComparator {
    /// Creates a comparator over `keys`, most significant first.
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// Ascending comparator over the given columns.
    pub fn ascending(columns: &[usize]) -> Self {
        Self::new(columns.iter().copied().map(SortKey::asc).collect())
    }

    /// Returns the keys.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Appends ascending keys for every column not already compared.
    ///
    /// Duplicate removal needs whole-row equality, so distinct sorts
    /// extend their comparator this way.
    pub fn with_remaining_columns(mut self, arity: usize) -> Self {
        for column in 0..arity {
            if !self.keys.iter().any(|k| k.column == column) {
                self.keys.push(SortKey::asc(column));
            }
        }
        self
    }

    /// Three-way comparison of two rows.
    pub fn compare(&self, left: &Row, right: &Row) -> Ordering {
        for key in &self.keys {
            let ordering = left
                .value(key.column)
                .compare_with_nulls(right.value(key.column), key.null_ordering);
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// How NULL join or group keys compare for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NullEquality {
    /// SQL semantics: a NULL key never equals anything.
    #[default]
    ThreeValued,
    /// Set-operation semantics: NULL equals NULL.
    Grouping,
}

/// Orders two rows on parallel key column lists, NULLs low.
pub fn compare_keys(left: &Row, left_cols: &[usize], right: &Row, right_cols: &[usize]) -> Ordering {
    for (&l, &r) in left_cols.iter().zip(right_cols) {
        let ordering = left
            .value(l)
            .compare_with_nulls(right.value(r), NullOrdering::Low);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Key equality under `mode`.
pub fn keys_equal(
    left: &Row,
    left_cols: &[usize],
    right: &Row,
    right_cols: &[usize],
    mode: NullEquality,
) -> bool {
    if mode == NullEquality::ThreeValued
        && (left.has_null_in(left_cols) || right.has_null_in(right_cols))
    {
        return false;
    }
    compare_keys(left, left_cols, right, right_cols) == Ordering::Equal
}
