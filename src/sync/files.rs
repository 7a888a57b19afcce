//! Tree File Codec
//!
//! Every published generation produces two files: a full-tree file with
//! every reachable node and a delta file with exactly the nodes that first
//! appeared in that generation. Files are sequences of length-prefixed
//! records in post-order (left, right, parent), so children always precede
//! parents and a streaming reader can insert nodes as they arrive. Peers
//! reject any file that does not reconstruct to the advertised root.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;

use crate::store::error::StoreResult;
use crate::store::{ancestors, nodes, roots, DataStore, StoreError};
use crate::types::{Bytes32, Node, Root, Status, EMPTY_ROOT_HASH};

/// Record tag for internal nodes.
const TAG_INTERNAL: u8 = 0;
/// Record tag for terminal nodes.
const TAG_TERMINAL: u8 = 1;

/// File codec errors
#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt tree file: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `<store_id>-<root>-full-<generation>-v1.0.dat`
pub fn get_full_tree_filename(store_id: &Bytes32, root_hash: &Bytes32, generation: u64) -> String {
    format!(
        "{}-{}-full-{}-v1.0.dat",
        hex::encode(store_id),
        hex::encode(root_hash),
        generation
    )
}

/// `<store_id>-<root>-delta-<generation>-v1.0.dat`
pub fn get_delta_filename(store_id: &Bytes32, root_hash: &Bytes32, generation: u64) -> String {
    format!(
        "{}-{}-delta-{}-v1.0.dat",
        hex::encode(store_id),
        hex::encode(root_hash),
        generation
    )
}

/// Directory a store's files land in, honoring `group_files_by_store`.
pub fn store_files_dir(base: &Path, store_id: &Bytes32, group_files_by_store: bool) -> PathBuf {
    if group_files_by_store {
        base.join(hex::encode(store_id))
    } else {
        base.to_path_buf()
    }
}

/// One node record of a tree file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedNode {
    Internal {
        left_hash: Bytes32,
        right_hash: Bytes32,
    },
    Terminal { key: Vec<u8>, value: Vec<u8> },
}

fn encode_record(node: &SerializedNode) -> Vec<u8> {
    match node {
        SerializedNode::Internal {
            left_hash,
            right_hash,
        } => {
            let mut out = Vec::with_capacity(65);
            out.push(TAG_INTERNAL);
            out.extend_from_slice(left_hash);
            out.extend_from_slice(right_hash);
            out
        }
        SerializedNode::Terminal { key, value } => {
            let mut out = Vec::with_capacity(9 + key.len() + value.len());
            out.push(TAG_TERMINAL);
            out.extend_from_slice(&(key.len() as u32).to_be_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(&(value.len() as u32).to_be_bytes());
            out.extend_from_slice(value);
            out
        }
    }
}

fn append_record(out: &mut Vec<u8>, node: &SerializedNode) {
    let record = encode_record(node);
    out.extend_from_slice(&(record.len() as u32).to_be_bytes());
    out.extend_from_slice(&record);
}

/// Parse a whole tree file into records.
pub fn parse_nodes(bytes: &[u8]) -> Result<Vec<SerializedNode>, FileError> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let length = read_u32(bytes, &mut offset)? as usize;
        if bytes.len() - offset < length {
            return Err(FileError::Corrupt(format!(
                "record of {} bytes truncated at offset {}",
                length, offset
            )));
        }
        let record = &bytes[offset..offset + length];
        offset += length;
        records.push(parse_record(record)?);
    }

    Ok(records)
}

fn parse_record(record: &[u8]) -> Result<SerializedNode, FileError> {
    let tag = *record
        .first()
        .ok_or_else(|| FileError::Corrupt("empty record".into()))?;
    let body = &record[1..];

    match tag {
        TAG_INTERNAL => {
            if body.len() != 64 {
                return Err(FileError::Corrupt(format!(
                    "internal record with {} payload bytes",
                    body.len()
                )));
            }
            let left_hash: Bytes32 = body[..32].try_into().expect("length checked");
            let right_hash: Bytes32 = body[32..].try_into().expect("length checked");
            Ok(SerializedNode::Internal {
                left_hash,
                right_hash,
            })
        }
        TAG_TERMINAL => {
            let mut offset = 0usize;
            let key_length = read_u32(body, &mut offset)? as usize;
            let key = read_bytes(body, &mut offset, key_length)?;
            let value_length = read_u32(body, &mut offset)? as usize;
            let value = read_bytes(body, &mut offset, value_length)?;
            if offset != body.len() {
                return Err(FileError::Corrupt("trailing bytes in terminal record".into()));
            }
            Ok(SerializedNode::Terminal { key, value })
        }
        other => Err(FileError::Corrupt(format!("unknown record tag: {}", other))),
    }
}

fn read_u32(bytes: &[u8], offset: &mut usize) -> Result<u32, FileError> {
    if bytes.len() - *offset < 4 {
        return Err(FileError::Corrupt("truncated length prefix".into()));
    }
    let raw: [u8; 4] = bytes[*offset..*offset + 4].try_into().expect("length checked");
    *offset += 4;
    Ok(u32::from_be_bytes(raw))
}

fn read_bytes(bytes: &[u8], offset: &mut usize, length: usize) -> Result<Vec<u8>, FileError> {
    if bytes.len() - *offset < length {
        return Err(FileError::Corrupt("truncated field".into()));
    }
    let out = bytes[*offset..*offset + length].to_vec();
    *offset += length;
    Ok(out)
}

impl DataStore {
    /// Serialize the tree under a root, in post-order. With `deltas_only`
    /// only nodes whose first recorded generation equals the root's
    /// generation are written. The empty tree serializes to no bytes.
    pub async fn serialize_tree(
        &self,
        root: &Root,
        store_id: &Bytes32,
        deltas_only: bool,
    ) -> Result<Vec<u8>, FileError> {
        let node_hash = match root.node_hash {
            None => return Ok(Vec::new()),
            Some(node_hash) => node_hash,
        };

        let conn = self.conn()?;
        let mut out = Vec::new();
        write_tree_node(&conn, root, &node_hash, store_id, deltas_only, &mut out)?;
        Ok(out)
    }

    /// Insert parsed node records and commit a root at the advertised hash.
    ///
    /// The whole import is one transaction: on any failure, including a
    /// missing advertised root, nothing is left behind and the store stays
    /// at its pre-parse generation.
    pub async fn import_tree_nodes(
        &self,
        store_id: Bytes32,
        records: Vec<SerializedNode>,
        expected_root_hash: Bytes32,
    ) -> StoreResult<Root> {
        self.with_writer(move |conn| {
            let mut last_hash: Option<Bytes32> = None;
            for record in &records {
                let hash = insert_record(conn, record)?;
                last_hash = Some(hash);
            }

            let node_hash = if expected_root_hash == EMPTY_ROOT_HASH {
                None
            } else {
                if nodes::try_get_node(conn, &expected_root_hash)?.is_none() {
                    return Err(StoreError::RootHashMismatch {
                        expected: expected_root_hash,
                        got: last_hash.unwrap_or(EMPTY_ROOT_HASH),
                    });
                }
                Some(expected_root_hash)
            };

            roots::insert_root_with_ancestors(conn, &store_id, node_hash.as_ref(), Status::Committed)
        })
        .await
    }
}

fn insert_record(conn: &Connection, record: &SerializedNode) -> StoreResult<Bytes32> {
    match record {
        SerializedNode::Internal {
            left_hash,
            right_hash,
        } => nodes::insert_internal_node(conn, left_hash, right_hash),
        SerializedNode::Terminal { key, value } => nodes::insert_terminal_node(conn, key, value),
    }
}

fn write_tree_node(
    conn: &Connection,
    root: &Root,
    node_hash: &Bytes32,
    store_id: &Bytes32,
    deltas_only: bool,
    out: &mut Vec<u8>,
) -> Result<(), FileError> {
    if deltas_only {
        let first_generation = ancestors::get_first_generation(conn, node_hash, store_id)?;
        // A hash first seen before this generation is not part of the delta.
        if first_generation != Some(root.generation) {
            return Ok(());
        }
    }

    let record = match nodes::get_node(conn, node_hash)? {
        Node::Internal(node) => {
            write_tree_node(conn, root, &node.left_hash, store_id, deltas_only, out)?;
            write_tree_node(conn, root, &node.right_hash, store_id, deltas_only, out)?;
            SerializedNode::Internal {
                left_hash: node.left_hash,
                right_hash: node.right_hash,
            }
        }
        Node::Terminal(node) => SerializedNode::Terminal {
            key: node.key,
            value: node.value,
        },
    };

    append_record(out, &record);
    Ok(())
}

/// Result of publishing one generation's files.
#[derive(Debug, Clone)]
pub struct WriteFilesResult {
    pub full_path: PathBuf,
    pub delta_path: PathBuf,
    pub root_hash: Bytes32,
}

/// Write the full and delta files for a committed root.
pub async fn write_files_for_root(
    store: &DataStore,
    store_id: Bytes32,
    root: &Root,
    files_dir: &Path,
    group_files_by_store: bool,
) -> Result<WriteFilesResult, FileError> {
    let root_hash = root.node_hash.unwrap_or(EMPTY_ROOT_HASH);
    let dir = store_files_dir(files_dir, &store_id, group_files_by_store);
    tokio::fs::create_dir_all(&dir).await?;

    let full_path = dir.join(get_full_tree_filename(&store_id, &root_hash, root.generation));
    let delta_path = dir.join(get_delta_filename(&store_id, &root_hash, root.generation));

    let full_bytes = store.serialize_tree(root, &store_id, false).await?;
    let delta_bytes = store.serialize_tree(root, &store_id, true).await?;

    tokio::fs::write(&full_path, full_bytes).await?;
    tokio::fs::write(&delta_path, delta_bytes).await?;

    Ok(WriteFilesResult {
        full_path,
        delta_path,
        root_hash,
    })
}

/// Parse one delta file and commit it at the advertised root.
pub async fn insert_from_delta_file(
    store: &DataStore,
    store_id: Bytes32,
    root_hash: Bytes32,
    path: &Path,
) -> Result<Root, FileError> {
    let bytes = tokio::fs::read(path).await?;
    let records = parse_nodes(&bytes)?;
    Ok(store.import_tree_nodes(store_id, records, root_hash).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BatchOperation;

    fn store_id(byte: u8) -> Bytes32 {
        [byte; 32]
    }

    async fn seeded_store(id: Bytes32, keys: u8) -> DataStore {
        let store = DataStore::in_memory().unwrap();
        store.create_store(id, Status::Committed).await.unwrap();
        for index in 0..keys {
            store
                .autoinsert(&[index], &[0x10 + index, index], id, Status::Committed)
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn test_filenames_are_bit_exact() {
        let id = [0x11; 32];
        let root = [0x22; 32];
        let id_hex = "11".repeat(32);
        let root_hex = "22".repeat(32);

        assert_eq!(
            get_full_tree_filename(&id, &root, 3),
            format!("{}-{}-full-3-v1.0.dat", id_hex, root_hex)
        );
        assert_eq!(
            get_delta_filename(&id, &root, 3),
            format!("{}-{}-delta-3-v1.0.dat", id_hex, root_hex)
        );
    }

    #[test]
    fn test_store_files_dir_grouping() {
        let base = Path::new("/tmp/files");
        assert_eq!(store_files_dir(base, &[0xab; 32], false), base);
        assert_eq!(
            store_files_dir(base, &[0xab; 32], true),
            base.join("ab".repeat(32))
        );
    }

    #[test]
    fn test_record_round_trip() {
        let records = vec![
            SerializedNode::Terminal {
                key: b"key".to_vec(),
                value: b"value".to_vec(),
            },
            SerializedNode::Terminal {
                key: Vec::new(),
                value: Vec::new(),
            },
            SerializedNode::Internal {
                left_hash: [0x01; 32],
                right_hash: [0x02; 32],
            },
        ];

        let mut bytes = Vec::new();
        for record in &records {
            append_record(&mut bytes, record);
        }

        assert_eq!(parse_nodes(&bytes).unwrap(), records);
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let mut bytes = Vec::new();
        append_record(
            &mut bytes,
            &SerializedNode::Terminal {
                key: b"key".to_vec(),
                value: b"value".to_vec(),
            },
        );
        bytes.truncate(bytes.len() - 1);

        assert!(matches!(parse_nodes(&bytes), Err(FileError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_full_tree_round_trip() {
        let id = store_id(1);
        let source = seeded_store(id, 8).await;
        let root = source.get_tree_root(&id, None).await.unwrap();

        let bytes = source.serialize_tree(&root, &id, false).await.unwrap();
        let records = parse_nodes(&bytes).unwrap();

        let destination = DataStore::in_memory().unwrap();
        destination.create_store(id, Status::Committed).await.unwrap();
        let imported = destination
            .import_tree_nodes(id, records, root.node_hash.unwrap())
            .await
            .unwrap();

        assert_eq!(imported.node_hash, root.node_hash);
        assert_eq!(
            destination.get_keys_values_dict(id).await.unwrap(),
            source.get_keys_values_dict(id).await.unwrap()
        );
        destination.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_delta_contains_only_new_nodes() {
        let id = store_id(1);
        let store = seeded_store(id, 4).await;

        // One more generation touching a single path.
        store
            .autoinsert(b"extra", b"value", id, Status::Committed)
            .await
            .unwrap();
        let root = store.get_tree_root(&id, None).await.unwrap();

        let full = parse_nodes(&store.serialize_tree(&root, &id, false).await.unwrap()).unwrap();
        let delta = parse_nodes(&store.serialize_tree(&root, &id, true).await.unwrap()).unwrap();

        assert!(delta.len() < full.len());
        assert!(delta.iter().any(|record| matches!(
            record,
            SerializedNode::Terminal { key, .. } if key == b"extra"
        )));
    }

    #[tokio::test]
    async fn test_delta_round_trip_over_generations() {
        let id = store_id(1);
        let source = DataStore::in_memory().unwrap();
        source.create_store(id, Status::Committed).await.unwrap();

        let destination = DataStore::in_memory().unwrap();
        destination.create_store(id, Status::Committed).await.unwrap();

        for round in 0u8..5 {
            let changelist = (0u8..10)
                .map(|index| BatchOperation::Insert {
                    key: vec![round, index],
                    value: vec![index, round],
                    reference_node_hash: None,
                    side: None,
                })
                .collect();
            source.insert_batch(id, changelist, Status::Committed).await.unwrap();

            let root = source.get_tree_root(&id, None).await.unwrap();
            let delta = parse_nodes(&source.serialize_tree(&root, &id, true).await.unwrap()).unwrap();
            destination
                .import_tree_nodes(id, delta, root.node_hash.unwrap())
                .await
                .unwrap();
        }

        let final_root = source.get_tree_root(&id, None).await.unwrap();
        let mirrored_root = destination.get_tree_root(&id, None).await.unwrap();
        assert_eq!(mirrored_root.generation, final_root.generation);
        assert_eq!(mirrored_root.node_hash, final_root.node_hash);
        assert_eq!(
            destination.get_keys_values_dict(id).await.unwrap(),
            source.get_keys_values_dict(id).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_import_with_wrong_root_rolls_back() {
        let id = store_id(1);
        let source = seeded_store(id, 4).await;
        let root = source.get_tree_root(&id, None).await.unwrap();
        let bytes = source.serialize_tree(&root, &id, false).await.unwrap();

        let destination = DataStore::in_memory().unwrap();
        destination.create_store(id, Status::Committed).await.unwrap();

        let result = destination
            .import_tree_nodes(id, parse_nodes(&bytes).unwrap(), [0x77; 32])
            .await;
        assert!(matches!(result, Err(StoreError::RootHashMismatch { .. })));

        // Nothing was committed, not even the node rows.
        assert_eq!(destination.get_tree_generation(&id).await.unwrap(), 0);
        assert!(destination
            .get_nodes(&[root.node_hash.unwrap()])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_empty_tree_serializes_to_empty_file() {
        let id = store_id(1);
        let store = DataStore::in_memory().unwrap();
        store.create_store(id, Status::Committed).await.unwrap();
        let root = store.get_tree_root(&id, None).await.unwrap();

        let bytes = store.serialize_tree(&root, &id, false).await.unwrap();
        assert!(bytes.is_empty());

        let imported = store
            .import_tree_nodes(id, Vec::new(), EMPTY_ROOT_HASH)
            .await
            .unwrap();
        assert_eq!(imported.node_hash, None);
        assert_eq!(imported.generation, 1);
    }
}
