//! Core identifier types.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Plan node identifier.
///
/// Assigned once when a plan is built and stored as plain data on the
/// immutable plan description. Execution trees built from the same plan
/// reuse the same identifiers.
///
/// # Example
///
/// ```rust
/// use federa_common::types::NodeId;
///
/// let node = NodeId::new(3);
/// assert_eq!(node.as_u32(), 3);
/// assert_eq!(node.index(), 3);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a new `NodeId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the identifier as an arena index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Buffer identifier - names one temporary buffer held by the buffer manager.
///
/// A buffer identifier is only a name. Ownership of the underlying storage
/// is expressed by the handle type that removes it, never by the id itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BufferId(u64);

impl BufferId {
    /// Invalid buffer ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new `BufferId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next buffer ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid buffer ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "BufferId(INVALID)")
        } else {
            write!(f, "BufferId({})", self.0)
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BufferId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Process identifier - identifies the query execution that submits
/// commands to the data manager.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Creates a new `ProcessId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId::new(7);
        assert_eq!(id.as_u32(), 7);
        assert_eq!(id.index(), 7);
        assert_eq!(format!("{id:?}"), "NodeId(7)");
        assert_eq!(NodeId::from(7), id);
    }

    #[test]
    fn test_buffer_id() {
        let id = BufferId::new(41);
        assert!(id.is_valid());
        assert_eq!(id.next(), BufferId::new(42));
        assert!(!BufferId::INVALID.is_valid());
        assert_eq!(format!("{:?}", BufferId::INVALID), "BufferId(INVALID)");
    }

    #[test]
    fn test_buffer_id_ordering() {
        assert!(BufferId::new(1) < BufferId::new(2));
        assert_eq!(BufferId::INVALID.next(), BufferId::INVALID);
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId::new(12).to_string(), "12");
    }
}
