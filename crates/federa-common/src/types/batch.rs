//! Tuple batches.
//!
//! A batch is a contiguous, 1-indexed range of rows `[begin_row, end_row]`
//! plus a flag marking the final batch of a stream.

use std::fmt;

use super::Row;

/// A contiguous chunk of a node's output rows.
///
/// Batches from one stream have strictly increasing, non-overlapping row
/// ranges, and exactly one batch (the last) carries the terminated flag.
/// An empty non-final batch means "nothing produced yet", never "done".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleBatch {
    begin_row: usize,
    rows: Vec<Row>,
    terminated: bool,
}

impl TupleBatch {
    /// Creates a batch whose first row has number `begin_row`.
    #[must_use]
    pub fn new(begin_row: usize, rows: Vec<Row>, terminated: bool) -> Self {
        Self {
            begin_row,
            rows,
            terminated,
        }
    }

    /// Creates an empty batch positioned at `begin_row`.
    #[must_use]
    pub fn empty(begin_row: usize, terminated: bool) -> Self {
        Self::new(begin_row, Vec::new(), terminated)
    }

    /// Returns the row number of the first row.
    #[must_use]
    pub fn begin_row(&self) -> usize {
        self.begin_row
    }

    /// Returns the row number of the last row.
    ///
    /// For an empty batch this is `begin_row - 1`.
    #[must_use]
    pub fn end_row(&self) -> usize {
        (self.begin_row + self.rows.len()).saturating_sub(1)
    }

    /// Returns the number of rows in the batch.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if this is the final batch of its stream.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Marks the batch as final.
    pub fn set_terminated(&mut self, terminated: bool) {
        self.terminated = terminated;
    }

    /// Returns the rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the batch and returns its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns true if `row_number` falls inside this batch.
    #[must_use]
    pub fn contains_row(&self, row_number: usize) -> bool {
        row_number >= self.begin_row && row_number < self.begin_row + self.rows.len()
    }

    /// Returns the row with the given row number.
    #[must_use]
    pub fn get_row(&self, row_number: usize) -> Option<&Row> {
        if self.contains_row(row_number) {
            self.rows.get(row_number - self.begin_row)
        } else {
            None
        }
    }
}

impl fmt::Display for TupleBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TupleBatch[{}..{}]{}",
            self.begin_row,
            self.end_row(),
            if self.terminated { " (final)" } else { "" }
        )
    }
}
