//! External multi-pass sort and duplicate removal.
//!
//! [`SortUtility`] reads its input in memory-bounded windows, persists
//! each window as a sorted run in the buffer manager, then merges runs
//! with bounded fan-in until one remains. The same engine serves sort
//! nodes, grouping, join sides and distinct aggregates.

mod comparator;
mod utility;

pub use comparator::{compare_keys, keys_equal, ListComparator, NullEquality, SortKey};
pub use utility::SortUtility;

use serde::{Deserialize, Serialize};

/// What the sort engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortMode {
    /// Every input row, in a stable total order.
    Sort,
    /// Each distinct row once; order unspecified.
    DistinctOnly,
    /// Each distinct row once, in order.
    DistinctAndSort,
}

impl SortMode {
    /// Returns true for the duplicate-removing modes.
    pub const fn is_distinct(self) -> bool {
        !matches!(self, Self::Sort)
    }
}

impl std::fmt::Display for SortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sort => "sort",
            Self::DistinctOnly => "distinct",
            Self::DistinctAndSort => "distinct sort",
        };
        write!(f, "{name}")
    }
}
