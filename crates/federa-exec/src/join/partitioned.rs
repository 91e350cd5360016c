//! Partitioned sort-merge join.

use std::cmp::Ordering;
use std::collections::VecDeque;

use federa_common::error::FederaResult;
use federa_common::types::Row;
use tracing::debug;

use super::{JoinSpec, JoinStrategy, JoinType, SourceState};
use crate::expr::{evaluate_predicate, Expression};
use crate::sort::{compare_keys, NullEquality};

/// Join that holds one sorted side in memory as batch-sized partitions
/// and probes it with each row of the other side in arrival order.
///
/// Useful when one side is much larger than the other: only the small
/// side is sorted. Normally the right side is partitioned and probed with
/// left rows. For an inner join whose right side dominates, the roles are
/// mirrored while the output keeps left columns first. A probe locates
/// the first partition whose last key is not below the probe key, then
/// binary-searches inside it; matches may continue into the following
/// partitions.
#[derive(Debug)]
pub struct PartitionedJoinStrategy {
    join_type: JoinType,
    probe_keys: Vec<usize>,
    build_keys: Vec<usize>,
    criteria: Option<Expression>,
    null_equality: NullEquality,
    partitions: Vec<Vec<Row>>,
    build_nulls: Row,
    /// The left side is partitioned and right rows probe it.
    mirrored: bool,
    probe_pos: usize,
    output: VecDeque<Row>,
}

impl PartitionedJoinStrategy {
    /// Returns true if the algorithm supports `join_type`.
    pub fn supports(join_type: JoinType) -> bool {
        matches!(
            join_type,
            JoinType::Inner | JoinType::LeftOuter | JoinType::Semi | JoinType::AntiSemi
        )
    }

    /// Partitions the loaded, key-ordered right side.
    ///
    /// Returns `None` when the join type is unsupported or the right side
    /// needs more than `max_partitions` partitions of `partition_rows`
    /// rows; the caller then falls back to a merge join.
    pub fn try_new(
        spec: &JoinSpec,
        right: &SourceState,
        max_partitions: usize,
        partition_rows: usize,
    ) -> FederaResult<Option<Self>> {
        if !Self::supports(spec.join_type) {
            return Ok(None);
        }
        Self::build(spec, right, false, max_partitions, partition_rows)
    }

    /// Partitions the loaded, key-ordered left side of an inner join and
    /// probes it with right rows.
    ///
    /// Returns `None` for any other join type or when the left side needs
    /// more than `max_partitions` partitions.
    pub fn try_new_mirrored(
        spec: &JoinSpec,
        left: &SourceState,
        max_partitions: usize,
        partition_rows: usize,
    ) -> FederaResult<Option<Self>> {
        if spec.join_type != JoinType::Inner {
            return Ok(None);
        }
        Self::build(spec, left, true, max_partitions, partition_rows)
    }

    fn build(
        spec: &JoinSpec,
        side: &SourceState,
        mirrored: bool,
        max_partitions: usize,
        partition_rows: usize,
    ) -> FederaResult<Option<Self>> {
        if !side.is_sorted() {
            return Ok(None);
        }
        let partition_rows = partition_rows.max(1);
        if side.row_count().div_ceil(partition_rows) > max_partitions {
            debug!(
                rows = side.row_count(),
                mirrored, max_partitions, "join side too large to partition"
            );
            return Ok(None);
        }
        let partitions: Vec<Vec<Row>> = side
            .read_all()?
            .chunks(partition_rows)
            .map(<[Row]>::to_vec)
            .collect();
        let (probe_keys, build_keys) = if mirrored {
            (spec.right_keys.clone(), spec.left_keys.clone())
        } else {
            (spec.left_keys.clone(), spec.right_keys.clone())
        };
        Ok(Some(Self {
            join_type: spec.join_type,
            probe_keys,
            build_keys,
            criteria: spec.criteria.clone(),
            null_equality: spec.null_equality,
            partitions,
            build_nulls: side.null_row().clone(),
            mirrored,
            probe_pos: 1,
            output: VecDeque::new(),
        }))
    }

    /// Returns the number of in-memory partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns true when the left side is the partitioned one.
    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    fn probe(&mut self, probe_row: Row) -> FederaResult<()> {
        let matches = find_matches(
            &self.partitions,
            &probe_row,
            &self.probe_keys,
            &self.build_keys,
            self.null_equality,
        );
        let mut matched = false;
        for build_row in matches {
            let joined = if self.mirrored {
                build_row.concat(&probe_row)
            } else {
                probe_row.concat(build_row)
            };
            if let Some(criteria) = &self.criteria {
                if !evaluate_predicate(criteria, &joined, &[])? {
                    continue;
                }
            }
            matched = true;
            match self.join_type {
                JoinType::Semi => {
                    self.output.push_back(probe_row.clone());
                    break;
                }
                JoinType::AntiSemi => break,
                _ => self.output.push_back(joined),
            }
        }
        if !matched {
            match self.join_type {
                JoinType::LeftOuter => self.output.push_back(probe_row.concat(&self.build_nulls)),
                JoinType::AntiSemi => self.output.push_back(probe_row),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Partitioned rows whose keys equal the probe row's keys, in key order.
fn find_matches<'a>(
    partitions: &'a [Vec<Row>],
    probe_row: &Row,
    probe_keys: &[usize],
    build_keys: &[usize],
    null_equality: NullEquality,
) -> Vec<&'a Row> {
    if null_equality == NullEquality::ThreeValued && probe_row.has_null_in(probe_keys) {
        return Vec::new();
    }
    let cmp = |build_row: &Row| compare_keys(build_row, build_keys, probe_row, probe_keys);
    let first = partitions.partition_point(|partition| {
        partition
            .last()
            .map_or(true, |last| cmp(last) == Ordering::Less)
    });

    let mut matches = Vec::new();
    for partition in &partitions[first..] {
        let start = partition.partition_point(|row| cmp(row) == Ordering::Less);
        let run = partition[start..]
            .iter()
            .take_while(|row| cmp(*row) == Ordering::Equal);
        let before = matches.len();
        matches.extend(run);
        // the run stops inside this partition unless it reached the end
        if start + (matches.len() - before) < partition.len() {
            break;
        }
    }
    matches
}

impl JoinStrategy for PartitionedJoinStrategy {
    fn name(&self) -> &'static str {
        "partitioned sort"
    }

    fn next_row(
        &mut self,
        left: &mut SourceState,
        right: &mut SourceState,
    ) -> FederaResult<Option<Row>> {
        let probe_side = if self.mirrored { right } else { left };
        loop {
            if let Some(row) = self.output.pop_front() {
                return Ok(Some(row));
            }
            let Some(probe_row) = probe_side.row_at(self.probe_pos)? else {
                return Ok(None);
            };
            self.probe_pos += 1;
            self.probe(probe_row)?;
        }
    }
}
