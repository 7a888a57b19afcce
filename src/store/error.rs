//! Store Error Types
//!
//! Tagged error kinds for the node table, root registry, ancestor index and
//! tree engine. Callers match on variants instead of parsing messages.

use thiserror::Error;

use crate::types::Bytes32;

/// Which integrity self-check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    InternalKeyValue,
    InternalLeftRightBytes32,
    TerminalLeftRight,
    RootsNotIncrementing,
    NodeHash,
}

impl std::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IntegrityKind::InternalKeyValue => "internal-key-value",
            IntegrityKind::InternalLeftRightBytes32 => "internal-left-right-bytes32",
            IntegrityKind::TerminalLeftRight => "terminal-left-right",
            IntegrityKind::RootsNotIncrementing => "roots-not-incrementing",
            IntegrityKind::NodeHash => "node-hash",
        };
        write!(f, "{}", name)
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {}", hex::encode(.key))]
    KeyNotFound { key: Vec<u8> },

    #[error("key already present: {}", hex::encode(.key))]
    KeyAlreadyPresent { key: Vec<u8> },

    #[error("unknown root: {}", hex::encode(.hash))]
    UnknownRoot { hash: Bytes32 },

    #[error("root hash mismatch: expected {}, got {}", hex::encode(.expected), hex::encode(.got))]
    RootHashMismatch { expected: Bytes32, got: Bytes32 },

    #[error("integrity check failed: {kind}")]
    Integrity {
        kind: IntegrityKind,
        hashes: Vec<Bytes32>,
    },

    #[error("operation would exceed the maximum tree depth")]
    TreeDepthExceeded,

    #[error("changelist resulted in no change to tree data")]
    NoChange,

    #[error("no store found for id: {}", hex::encode(.store_id))]
    UnknownStore { store_id: Bytes32 },

    #[error("store already exists: {}", hex::encode(.store_id))]
    StoreAlreadyExists { store_id: Bytes32 },

    #[error("node not found for requested hash: {}", hex::encode(.hash))]
    NodeNotFound { hash: Bytes32 },

    #[error("node insertion with matching hash but differing fields: {}", hex::encode(.hash))]
    NodeConflict { hash: Bytes32 },

    #[error("ancestor insertion contradicts an earlier row for: {}", hex::encode(.hash))]
    AncestorConflict { hash: Bytes32 },

    #[error("multiple pending roots found for store: {}", hex::encode(.store_id))]
    MultiplePendingRoots { store_id: Bytes32 },

    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Connection(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_hex() {
        let err = StoreError::KeyNotFound { key: vec![0x01, 0x02] };
        assert!(err.to_string().contains("0102"));

        let err = StoreError::RootHashMismatch {
            expected: [0xab; 32],
            got: [0xcd; 32],
        };
        let text = err.to_string();
        assert!(text.contains("abab"));
        assert!(text.contains("cdcd"));
    }

    #[test]
    fn test_integrity_kind_names() {
        assert_eq!(IntegrityKind::NodeHash.to_string(), "node-hash");
        assert_eq!(
            IntegrityKind::RootsNotIncrementing.to_string(),
            "roots-not-incrementing"
        );
    }
}
