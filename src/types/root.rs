//! Root Registry Types
//!
//! Each committed state of a store is a generation with an optional Merkle
//! root hash. Generation 0 is always the empty tree with no hash.

use super::node::Bytes32;

/// Lifecycle status of a root row.
///
/// A root starts out pending (either from a single mutation or a batch) and
/// is either promoted to committed or cleared. The numeric values are part
/// of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending = 1,
    Committed = 2,
    PendingBatch = 3,
}

impl Status {
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(Status::Pending),
            2 => Some(Status::Committed),
            3 => Some(Status::PendingBatch),
            _ => None,
        }
    }

    /// True for the two not-yet-committed states.
    pub fn is_pending(self) -> bool {
        matches!(self, Status::Pending | Status::PendingBatch)
    }
}

/// One row of the root registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Root {
    pub store_id: Bytes32,
    pub node_hash: Option<Bytes32>,
    pub generation: u64,
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [Status::Pending, Status::Committed, Status::PendingBatch] {
            assert_eq!(Status::from_i64(status as i64), Some(status));
        }
        assert_eq!(Status::from_i64(0), None);
    }

    #[test]
    fn test_is_pending() {
        assert!(Status::Pending.is_pending());
        assert!(Status::PendingBatch.is_pending());
        assert!(!Status::Committed.is_pending());
    }
}
