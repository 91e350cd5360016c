//! Merge join and its nested-loop degenerate form.

use std::cmp::Ordering;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::Row;

use super::{JoinSpec, JoinStrategy, JoinType, SourceState};
use crate::expr::{evaluate_predicate, Expression};
use crate::sort::{compare_keys, NullEquality};

/// Rows of both sides sharing one key value.
#[derive(Debug)]
struct MatchWindow {
    left_end: usize,
    right_start: usize,
    right_end: usize,
    /// Current outer (left) row number and its cached value.
    outer: usize,
    outer_row: Option<Row>,
    /// Next inner (right) row number to try against the outer row.
    inner: usize,
    outer_matched: bool,
    /// Set once a semi or anti join has seen a match for the outer row.
    skip_inner: bool,
    /// Right rows of the window that joined; full outer join only.
    right_matched: Vec<bool>,
    /// Next right row checked for the unmatched pass.
    leftover: usize,
}

#[derive(Debug)]
enum MergeState {
    Scan,
    Match(MatchWindow),
    Done,
}

enum ScanStep {
    Emit(Row),
    Advance,
    Window(MatchWindow),
    Done,
}

/// Sort-merge join over two key-ordered sides.
///
/// Scanning compares the current key of each side; an exhausted side
/// compares after everything. The side that is behind either advances or,
/// for outer joins, emits its row padded with NULLs. Equal keys open a
/// match window: every left row of the run is tried against every right
/// row of the run, and the scan resumes just past both runs.
///
/// Without key columns the whole of each side forms a single window,
/// which is exactly a nested-loop join.
#[derive(Debug)]
pub struct MergeJoinStrategy {
    join_type: JoinType,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    criteria: Option<Expression>,
    null_equality: NullEquality,
    nested_loop: bool,
    left_pos: usize,
    right_pos: usize,
    state: MergeState,
}

impl MergeJoinStrategy {
    /// Creates a merge join; both sides must be ordered on their keys.
    pub fn new(spec: &JoinSpec) -> Self {
        Self::with_mode(spec, false)
    }

    /// Creates a nested-loop join; sides may be in any order.
    pub fn nested_loop(spec: &JoinSpec) -> Self {
        Self::with_mode(spec, true)
    }

    fn with_mode(spec: &JoinSpec, nested_loop: bool) -> Self {
        let nested_loop = nested_loop || spec.left_keys.is_empty();
        Self {
            join_type: spec.join_type,
            left_keys: if nested_loop { Vec::new() } else { spec.left_keys.clone() },
            right_keys: if nested_loop { Vec::new() } else { spec.right_keys.clone() },
            criteria: spec.criteria.clone(),
            null_equality: spec.null_equality,
            nested_loop,
            left_pos: 1,
            right_pos: 1,
            state: MergeState::Scan,
        }
    }

    fn emits_unmatched_left(&self) -> bool {
        matches!(
            self.join_type,
            JoinType::LeftOuter | JoinType::FullOuter | JoinType::AntiSemi
        )
    }

    fn pad_left(&self, left_row: Row, right: &SourceState) -> Row {
        if self.join_type == JoinType::AntiSemi {
            left_row
        } else {
            left_row.concat(right.null_row())
        }
    }

    fn accepts(&self, joined: &Row) -> FederaResult<bool> {
        match &self.criteria {
            Some(criteria) => evaluate_predicate(criteria, joined, &[]),
            None => Ok(true),
        }
    }

    fn open_window(&self, left_start: usize, left_end: usize, right_start: usize, right_end: usize) -> MatchWindow {
        let tracked = if self.join_type == JoinType::FullOuter {
            right_end + 1 - right_start
        } else {
            0
        };
        MatchWindow {
            left_end,
            right_start,
            right_end,
            outer: left_start,
            outer_row: None,
            inner: right_start,
            outer_matched: false,
            skip_inner: false,
            right_matched: vec![false; tracked],
            leftover: right_start,
        }
    }

    fn scan(&mut self, left: &mut SourceState, right: &mut SourceState) -> FederaResult<ScanStep> {
        let left_row = left.row_at(self.left_pos)?;
        let right_row = right.row_at(self.right_pos)?;
        let (l, r) = match (left_row, right_row) {
            (None, None) => return Ok(ScanStep::Done),
            (Some(l), None) => {
                if !self.emits_unmatched_left() {
                    return Ok(ScanStep::Done);
                }
                self.left_pos += 1;
                return Ok(ScanStep::Emit(self.pad_left(l, right)));
            }
            (None, Some(r)) => {
                if self.join_type != JoinType::FullOuter {
                    return Ok(ScanStep::Done);
                }
                self.right_pos += 1;
                return Ok(ScanStep::Emit(left.null_row().concat(&r)));
            }
            (Some(l), Some(r)) => (l, r),
        };

        if self.nested_loop {
            return Ok(ScanStep::Window(self.open_window(
                self.left_pos,
                left.row_count(),
                self.right_pos,
                right.row_count(),
            )));
        }

        let mut ordering = compare_keys(&l, &self.left_keys, &r, &self.right_keys);
        if ordering == Ordering::Equal
            && self.null_equality == NullEquality::ThreeValued
            && (l.has_null_in(&self.left_keys) || r.has_null_in(&self.right_keys))
        {
            // a NULL key matches nothing; let the left row go first
            ordering = Ordering::Less;
        }

        match ordering {
            Ordering::Less => {
                self.left_pos += 1;
                if self.emits_unmatched_left() {
                    Ok(ScanStep::Emit(self.pad_left(l, right)))
                } else {
                    Ok(ScanStep::Advance)
                }
            }
            Ordering::Greater => {
                self.right_pos += 1;
                if self.join_type == JoinType::FullOuter {
                    Ok(ScanStep::Emit(left.null_row().concat(&r)))
                } else {
                    Ok(ScanStep::Advance)
                }
            }
            Ordering::Equal => {
                let left_end = run_end(left, self.left_pos, &l, &self.left_keys)?;
                let right_end = run_end(right, self.right_pos, &r, &self.right_keys)?;
                Ok(ScanStep::Window(self.open_window(
                    self.left_pos,
                    left_end,
                    self.right_pos,
                    right_end,
                )))
            }
        }
    }

    /// Produces the next row of a match window, `None` once it is done.
    fn step_window(
        &self,
        w: &mut MatchWindow,
        left: &mut SourceState,
        right: &mut SourceState,
    ) -> FederaResult<Option<Row>> {
        while w.outer <= w.left_end {
            if w.outer_row.is_none() {
                w.outer_row = Some(left.row_at(w.outer)?.ok_or_else(|| lost_row(w.outer))?);
            }
            if let Some(l) = w.outer_row.as_ref() {
                if w.inner <= w.right_end && !w.skip_inner {
                    let r = right.row_at(w.inner)?.ok_or_else(|| lost_row(w.inner))?;
                    let slot = w.inner - w.right_start;
                    w.inner += 1;
                    let joined = l.concat(&r);
                    if !self.accepts(&joined)? {
                        continue;
                    }
                    w.outer_matched = true;
                    match self.join_type {
                        JoinType::Semi => {
                            w.skip_inner = true;
                            return Ok(Some(l.clone()));
                        }
                        JoinType::AntiSemi => w.skip_inner = true,
                        _ => {
                            if let Some(flag) = w.right_matched.get_mut(slot) {
                                *flag = true;
                            }
                            return Ok(Some(joined));
                        }
                    }
                    continue;
                }
            }

            // the outer row has seen the whole inner run
            let matched = w.outer_matched;
            let outer_row = w.outer_row.take();
            w.outer += 1;
            w.inner = w.right_start;
            w.outer_matched = false;
            w.skip_inner = false;
            if let Some(l) = outer_row {
                if !matched && self.emits_unmatched_left() {
                    return Ok(Some(self.pad_left(l, right)));
                }
            }
        }

        while !w.right_matched.is_empty() && w.leftover <= w.right_end {
            let pos = w.leftover;
            w.leftover += 1;
            if !w.right_matched[pos - w.right_start] {
                let r = right.row_at(pos)?.ok_or_else(|| lost_row(pos))?;
                return Ok(Some(left.null_row().concat(&r)));
            }
        }
        Ok(None)
    }
}

/// Last row number of the run of rows whose key equals `key_row`'s.
fn run_end(side: &mut SourceState, start: usize, key_row: &Row, keys: &[usize]) -> FederaResult<usize> {
    let mut end = start;
    while let Some(row) = side.row_at(end + 1)? {
        if compare_keys(&row, keys, key_row, keys) != Ordering::Equal {
            break;
        }
        end += 1;
    }
    Ok(end)
}

fn lost_row(row_number: usize) -> FederaError {
    FederaError::invariant(format!("join side lost row {row_number}"))
}

impl JoinStrategy for MergeJoinStrategy {
    fn name(&self) -> &'static str {
        if self.nested_loop {
            "nested loop"
        } else {
            "merge"
        }
    }

    fn next_row(
        &mut self,
        left: &mut SourceState,
        right: &mut SourceState,
    ) -> FederaResult<Option<Row>> {
        loop {
            match std::mem::replace(&mut self.state, MergeState::Done) {
                MergeState::Done => return Ok(None),
                MergeState::Scan => match self.scan(left, right)? {
                    ScanStep::Emit(row) => {
                        self.state = MergeState::Scan;
                        return Ok(Some(row));
                    }
                    ScanStep::Advance => self.state = MergeState::Scan,
                    ScanStep::Window(window) => self.state = MergeState::Match(window),
                    ScanStep::Done => return Ok(None),
                },
                MergeState::Match(mut window) => {
                    if let Some(row) = self.step_window(&mut window, left, right)? {
                        self.state = MergeState::Match(window);
                        return Ok(Some(row));
                    }
                    self.left_pos = window.left_end + 1;
                    self.right_pos = window.right_end + 1;
                    self.state = MergeState::Scan;
                }
            }
        }
    }
}
