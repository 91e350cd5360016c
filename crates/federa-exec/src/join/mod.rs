//! Joins.
//!
//! A [`JoinNode`] materializes its two inputs into [`SourceState`]s and
//! then runs a [`JoinStrategy`] over them:
//!
//! - [`MergeJoinStrategy`] scans both sides in key order and expands each
//!   run of equal keys into a match window. With no key columns the whole
//!   of each side is one window, which is the nested-loop join.
//! - [`PartitionedJoinStrategy`] sorts only the small side, keeps it in
//!   memory as batch-sized partitions, and probes it with each row of the
//!   unsorted large side. The small side is normally the right one; an
//!   inner join may partition the left side instead.
//!
//! A dependent join loads its left side first and publishes it through
//! the [`CommandContext`](crate::context::CommandContext) before opening
//! the right side, whose commands are parameterized by those rows.

mod merge;
mod node;
mod partitioned;
mod source_state;

pub use merge::MergeJoinStrategy;
pub use node::JoinNode;
pub use partitioned::PartitionedJoinStrategy;
pub use source_state::SourceState;

use std::fmt;

use federa_common::error::FederaResult;
use federa_common::types::Row;
use serde::{Deserialize, Serialize};

use crate::expr::Expression;
use crate::sort::NullEquality;

/// Join semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    /// Matching pairs.
    Inner,
    /// Matching pairs plus unmatched left rows padded with NULLs.
    LeftOuter,
    /// Left outer plus unmatched right rows padded with NULLs.
    FullOuter,
    /// Every pair.
    Cross,
    /// Left rows with at least one match, each once.
    Semi,
    /// Left rows without any match.
    AntiSemi,
}

impl JoinType {
    /// Returns true if only left columns are produced.
    pub const fn is_semi(self) -> bool {
        matches!(self, Self::Semi | Self::AntiSemi)
    }

    /// Returns true if unmatched left rows are emitted padded.
    pub const fn preserves_left(self) -> bool {
        matches!(self, Self::LeftOuter | Self::FullOuter)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inner => "INNER",
            Self::LeftOuter => "LEFT OUTER",
            Self::FullOuter => "FULL OUTER",
            Self::Cross => "CROSS",
            Self::Semi => "SEMI",
            Self::AntiSemi => "ANTI SEMI",
        };
        write!(f, "{name}")
    }
}

/// How a join side reaches key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOption {
    /// The input already arrives ordered on the join keys.
    AlreadySorted,
    /// Sort on the join keys.
    #[default]
    Sort,
    /// Sort on the join keys and drop duplicate rows.
    SortDistinct,
}

/// Join algorithm chosen at plan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinStrategyKind {
    /// Sort-merge join.
    #[default]
    Merge,
    /// Nested loop; used when there are no key columns.
    NestedLoop,
    /// Partitioned sort-merge join; falls back to merge at runtime when
    /// the right side is too large.
    PartitionedSort,
}

impl fmt::Display for JoinStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Merge => "merge",
            Self::NestedLoop => "nested loop",
            Self::PartitionedSort => "partitioned sort",
        };
        write!(f, "{name}")
    }
}

/// Compile-time description of a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Join semantics.
    pub join_type: JoinType,
    /// Algorithm.
    pub strategy: JoinStrategyKind,
    /// Key columns of the left input.
    pub left_keys: Vec<usize>,
    /// Key columns of the right input, parallel to `left_keys`.
    pub right_keys: Vec<usize>,
    /// How the left side is ordered.
    pub left_sort: SortOption,
    /// How the right side is ordered.
    pub right_sort: SortOption,
    /// Residual predicate over the concatenated left and right row.
    pub criteria: Option<Expression>,
    /// NULL key semantics.
    pub null_equality: NullEquality,
    /// Name under which the left rows are published for a dependent
    /// right side.
    pub dependent_source: Option<String>,
}

impl JoinSpec {
    /// Equi-join on parallel key lists.
    pub fn new(join_type: JoinType, left_keys: Vec<usize>, right_keys: Vec<usize>) -> Self {
        let strategy = if left_keys.is_empty() {
            JoinStrategyKind::NestedLoop
        } else {
            JoinStrategyKind::Merge
        };
        Self {
            join_type,
            strategy,
            left_keys,
            right_keys,
            left_sort: SortOption::Sort,
            right_sort: SortOption::Sort,
            criteria: None,
            null_equality: NullEquality::ThreeValued,
            dependent_source: None,
        }
    }

    /// Join with no key columns.
    pub fn nested_loop(join_type: JoinType, criteria: Option<Expression>) -> Self {
        Self::new(join_type, Vec::new(), Vec::new()).with_criteria(criteria)
    }

    /// Sets the residual predicate.
    pub fn with_criteria(mut self, criteria: Option<Expression>) -> Self {
        self.criteria = criteria;
        self
    }

    /// Sets the algorithm.
    pub fn with_strategy(mut self, strategy: JoinStrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets how both sides are ordered.
    pub fn with_sort(mut self, left: SortOption, right: SortOption) -> Self {
        self.left_sort = left;
        self.right_sort = right;
        self
    }

    /// Sets the NULL key semantics.
    pub fn with_null_equality(mut self, null_equality: NullEquality) -> Self {
        self.null_equality = null_equality;
        self
    }

    /// Makes the join dependent, publishing its left rows as `source`.
    pub fn dependent(mut self, source: impl Into<String>) -> Self {
        self.dependent_source = Some(source.into());
        self
    }

    /// Returns the algorithm that will run.
    ///
    /// Merge joins need key columns; without them the join is a nested loop.
    pub fn effective_strategy(&self) -> JoinStrategyKind {
        if self.left_keys.is_empty() || self.join_type == JoinType::Cross {
            JoinStrategyKind::NestedLoop
        } else {
            self.strategy
        }
    }
}

/// A join algorithm over two materialized sides.
pub trait JoinStrategy: fmt::Debug {
    /// Returns a short name of the algorithm.
    fn name(&self) -> &'static str;

    /// Returns the next joined row, or `None` once the join is complete.
    ///
    /// Both sides are buffered, so this never suspends.
    fn next_row(&mut self, left: &mut SourceState, right: &mut SourceState)
        -> FederaResult<Option<Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_strategy() {
        assert_eq!(
            JoinSpec::new(JoinType::Inner, vec![0], vec![0]).effective_strategy(),
            JoinStrategyKind::Merge
        );
        assert_eq!(
            JoinSpec::new(JoinType::Inner, vec![], vec![])
                .with_strategy(JoinStrategyKind::Merge)
                .effective_strategy(),
            JoinStrategyKind::NestedLoop
        );
        assert_eq!(
            JoinSpec::new(JoinType::Cross, vec![0], vec![0]).effective_strategy(),
            JoinStrategyKind::NestedLoop
        );
    }

    #[test]
    fn test_join_type_flags() {
        assert!(JoinType::AntiSemi.is_semi());
        assert!(JoinType::FullOuter.preserves_left());
        assert!(!JoinType::Inner.preserves_left());
        assert_eq!(JoinType::LeftOuter.to_string(), "LEFT OUTER");
    }
}
