//! Key/Value Diff Engine
//!
//! Compares the terminal sets reachable from two roots of the same store.
//! The zero hash denotes the empty tree; any other root must exist in the
//! node table.

use std::collections::HashSet;

use rusqlite::Connection;

use super::error::{StoreError, StoreResult};
use super::{nodes, tree, DataStore};
use crate::types::{Bytes32, TerminalNode, EMPTY_ROOT_HASH};

/// Direction of one diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Delete,
}

/// One key/value difference between two roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffData {
    pub op: OperationType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl DataStore {
    /// Differences between the trees under `root_a` and `root_b`:
    /// insertions present only in `b`, deletions present only in `a`.
    pub async fn get_kv_diff(
        &self,
        store_id: Bytes32,
        root_a: Bytes32,
        root_b: Bytes32,
    ) -> StoreResult<HashSet<DiffData>> {
        self.read(|conn| {
            super::roots::get_tree_generation(conn, &store_id)?;
            let old_pairs = pairs_for_root(conn, &root_a)?;
            let new_pairs = pairs_for_root(conn, &root_b)?;

            let insertions = new_pairs.difference(&old_pairs).map(|node| DiffData {
                op: OperationType::Insert,
                key: node.key.clone(),
                value: node.value.clone(),
            });
            let deletions = old_pairs.difference(&new_pairs).map(|node| DiffData {
                op: OperationType::Delete,
                key: node.key.clone(),
                value: node.value.clone(),
            });

            Ok(insertions.chain(deletions).collect())
        })
    }
}

fn pairs_for_root(conn: &Connection, root_hash: &Bytes32) -> StoreResult<HashSet<TerminalNode>> {
    if *root_hash == EMPTY_ROOT_HASH {
        return Ok(HashSet::new());
    }
    if nodes::try_get_node(conn, root_hash)?.is_none() {
        return Err(StoreError::UnknownRoot { hash: *root_hash });
    }
    Ok(tree::get_keys_values(conn, Some(root_hash))?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    fn store_id(byte: u8) -> Bytes32 {
        [byte; 32]
    }

    #[tokio::test]
    async fn test_diff_between_generations() {
        let id = store_id(1);
        let store = DataStore::in_memory().unwrap();
        store.create_store(id, Status::Committed).await.unwrap();

        store.autoinsert(b"a", b"1", id, Status::Committed).await.unwrap();
        store.autoinsert(b"b", b"2", id, Status::Committed).await.unwrap();
        let root_a = store.get_tree_root(&id, None).await.unwrap().node_hash.unwrap();

        store.delete(b"a", id, Status::Committed).await.unwrap();
        store.autoinsert(b"c", b"3", id, Status::Committed).await.unwrap();
        let root_b = store.get_tree_root(&id, None).await.unwrap().node_hash.unwrap();

        let diff = store.get_kv_diff(id, root_a, root_b).await.unwrap();
        let expected: HashSet<DiffData> = [
            DiffData {
                op: OperationType::Delete,
                key: b"a".to_vec(),
                value: b"1".to_vec(),
            },
            DiffData {
                op: OperationType::Insert,
                key: b"c".to_vec(),
                value: b"3".to_vec(),
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(diff, expected);
    }

    #[tokio::test]
    async fn test_diff_from_empty_root() {
        let id = store_id(1);
        let store = DataStore::in_memory().unwrap();
        store.create_store(id, Status::Committed).await.unwrap();
        store.autoinsert(b"a", b"1", id, Status::Committed).await.unwrap();
        let root = store.get_tree_root(&id, None).await.unwrap().node_hash.unwrap();

        let diff = store.get_kv_diff(id, EMPTY_ROOT_HASH, root).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert!(diff.iter().all(|entry| entry.op == OperationType::Insert));

        let reverse = store.get_kv_diff(id, root, EMPTY_ROOT_HASH).await.unwrap();
        assert!(reverse.iter().all(|entry| entry.op == OperationType::Delete));
    }

    #[tokio::test]
    async fn test_diff_unknown_root_fails() {
        let id = store_id(1);
        let store = DataStore::in_memory().unwrap();
        store.create_store(id, Status::Committed).await.unwrap();
        store.autoinsert(b"a", b"1", id, Status::Committed).await.unwrap();
        let root = store.get_tree_root(&id, None).await.unwrap().node_hash.unwrap();

        let result = store.get_kv_diff(id, [0x99; 32], root).await;
        assert!(matches!(result, Err(StoreError::UnknownRoot { .. })));
    }
}
