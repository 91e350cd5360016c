//! Row-at-a-time sources.
//!
//! Nodes produce batches, but most algorithms consume one row at a time.
//! [`TupleSource`] is the common row interface; [`BatchIterator`] turns a
//! child node's batch stream into rows while remembering its place across
//! suspensions.

use std::fmt;

use federa_common::types::Row;

use crate::node::ExecNode;
use crate::poll::{Poll, PollResult};
use crate::ready;

/// A suspendable source of rows.
pub trait TupleSource {
    /// Returns the next row, `None` at end of input, or Pending.
    fn next_row(&mut self) -> PollResult<Option<Row>>;
}

/// Reads a child node's output row by row.
///
/// The iterator owns the rows of the batch it is consuming, so a
/// suspension between batches never loses rows already fetched.
pub struct BatchIterator {
    rows: std::vec::IntoIter<Row>,
    terminated: bool,
    exhausted: bool,
}

impl BatchIterator {
    /// Creates an iterator that has not read anything yet.
    pub fn new() -> Self {
        Self {
            rows: Vec::new().into_iter(),
            terminated: false,
            exhausted: false,
        }
    }

    /// Returns the next row of `node`'s stream.
    ///
    /// Empty non-final batches are skipped: they mean "nothing produced".
    pub fn next_row(&mut self, node: &mut dyn ExecNode) -> PollResult<Option<Row>> {
        loop {
            if let Some(row) = self.rows.next() {
                return Ok(Poll::Ready(Some(row)));
            }
            if self.terminated {
                self.exhausted = true;
                return Ok(Poll::Ready(None));
            }
            let batch = ready!(node.next_batch());
            self.terminated = batch.is_terminated();
            self.rows = batch.into_rows().into_iter();
        }
    }

    /// Returns true once the final batch has been fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Forgets all progress.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for BatchIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BatchIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchIterator")
            .field("buffered", &self.rows.len())
            .field("terminated", &self.terminated)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Borrowed pairing of a child node with its iterator.
pub struct NodeRows<'a> {
    iter: &'a mut BatchIterator,
    node: &'a mut dyn ExecNode,
}

impl<'a> NodeRows<'a> {
    /// Pairs `node` with the iterator that tracks its stream.
    pub fn new(iter: &'a mut BatchIterator, node: &'a mut dyn ExecNode) -> Self {
        Self { iter, node }
    }
}

impl TupleSource for NodeRows<'_> {
    fn next_row(&mut self) -> PollResult<Option<Row>> {
        self.iter.next_row(self.node)
    }
}

/// An in-memory row list. Never suspends.
#[derive(Debug)]
pub struct VecSource {
    rows: std::vec::IntoIter<Row>,
}

impl VecSource {
    /// Creates a source yielding `rows` in order.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl TupleSource for VecSource {
    fn next_row(&mut self) -> PollResult<Option<Row>> {
        Ok(Poll::Ready(self.rows.next()))
    }
}
