//! Node Table (content-addressed)
//!
//! Rows are immutable once written: re-inserting an identical node is a
//! no-op, re-inserting the same hash with any differing field is an error.
//! Hashes are always recomputed from the node contents on insertion, so a
//! row can never claim a hash it does not have.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{IntegrityKind, StoreError, StoreResult};
use super::DataStore;
use crate::merkle::hash::{internal_hash, leaf_hash};
use crate::types::{Bytes32, InternalNode, Node, NodeType, TerminalNode};

impl DataStore {
    /// Insert a node from its raw serialized fields.
    ///
    /// For internal nodes `value1`/`value2` are the child hashes, for
    /// terminal nodes the key and value. Returns the node hash. Idempotent
    /// on exact match.
    pub async fn insert_node(
        &self,
        node_type: NodeType,
        value1: &[u8],
        value2: &[u8],
    ) -> StoreResult<Bytes32> {
        let value1 = value1.to_vec();
        let value2 = value2.to_vec();
        self.with_writer(move |conn| match node_type {
            NodeType::Internal => {
                let left = blob32(value1)?;
                let right = blob32(value2)?;
                insert_internal_node(conn, &left, &right)
            }
            NodeType::Terminal => insert_terminal_node(conn, &value1, &value2),
        })
        .await
    }

    /// Get a node by hash, failing if it is missing.
    pub async fn get_node(&self, node_hash: &Bytes32) -> StoreResult<Node> {
        self.read(|conn| get_node(conn, node_hash))
    }

    /// Get several nodes by hash, failing with the list of missing hashes.
    pub async fn get_nodes(&self, node_hashes: &[Bytes32]) -> StoreResult<Vec<Node>> {
        self.read(|conn| {
            let mut found = Vec::with_capacity(node_hashes.len());
            let mut missing = Vec::new();
            for node_hash in node_hashes {
                match try_get_node(conn, node_hash)? {
                    Some(node) => found.push(node),
                    None => missing.push(*node_hash),
                }
            }
            if missing.is_empty() {
                Ok(found)
            } else {
                Err(StoreError::Integrity {
                    kind: IntegrityKind::NodeHash,
                    hashes: missing,
                })
            }
        })
    }

    /// Get the type of a node by hash.
    pub async fn get_node_type(&self, node_hash: &Bytes32) -> StoreResult<NodeType> {
        self.read(|conn| get_node_type(conn, node_hash))
    }

    /// Run all integrity self-checks, failing on the first violation.
    pub async fn check(&self) -> StoreResult<()> {
        self.read(|conn| {
            check_internal_key_value_are_null(conn)?;
            check_internal_left_right_are_bytes32(conn)?;
            check_terminal_left_right_are_null(conn)?;
            check_roots_are_incrementing(conn)?;
            check_hashes(conn)?;
            Ok(())
        })
    }
}

/// Raw row shape of the node table.
type NodeRow = (
    Vec<u8>,
    i64,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
);

pub(crate) fn blob32(raw: Vec<u8>) -> StoreResult<Bytes32> {
    raw.as_slice()
        .try_into()
        .map_err(|_| StoreError::Internal(format!("expected a 32-byte blob, got {} bytes", raw.len())))
}

fn fetch_row(conn: &Connection, node_hash: &[u8]) -> StoreResult<Option<NodeRow>> {
    let row = conn
        .query_row(
            "SELECT hash, node_type, left, right, key, value FROM node WHERE hash = ?1",
            params![node_hash],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn node_from_row(row: NodeRow) -> StoreResult<Node> {
    let (hash, node_type, left, right, key, value) = row;
    let hash = blob32(hash)?;

    match NodeType::from_i64(node_type) {
        Some(NodeType::Internal) => {
            let left_hash =
                blob32(left.ok_or_else(|| StoreError::Internal("internal node with null left".into()))?)?;
            let right_hash =
                blob32(right.ok_or_else(|| StoreError::Internal("internal node with null right".into()))?)?;
            Ok(Node::Internal(InternalNode {
                hash,
                left_hash,
                right_hash,
            }))
        }
        Some(NodeType::Terminal) => {
            let key = key.ok_or_else(|| StoreError::Internal("terminal node with null key".into()))?;
            let value =
                value.ok_or_else(|| StoreError::Internal("terminal node with null value".into()))?;
            Ok(Node::Terminal(TerminalNode { hash, key, value }))
        }
        None => Err(StoreError::Internal(format!("unknown node type: {}", node_type))),
    }
}

pub(crate) fn try_get_node(conn: &Connection, node_hash: &Bytes32) -> StoreResult<Option<Node>> {
    match fetch_row(conn, node_hash.as_slice())? {
        None => Ok(None),
        Some(row) => Ok(Some(node_from_row(row)?)),
    }
}

pub(crate) fn get_node(conn: &Connection, node_hash: &Bytes32) -> StoreResult<Node> {
    try_get_node(conn, node_hash)?.ok_or(StoreError::NodeNotFound { hash: *node_hash })
}

pub(crate) fn get_node_type(conn: &Connection, node_hash: &Bytes32) -> StoreResult<NodeType> {
    let raw: Option<i64> = conn
        .query_row(
            "SELECT node_type FROM node WHERE hash = ?1",
            params![node_hash.as_slice()],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Err(StoreError::NodeNotFound { hash: *node_hash }),
        Some(raw) => NodeType::from_i64(raw)
            .ok_or_else(|| StoreError::Internal(format!("unknown node type: {}", raw))),
    }
}

/// Insert a fully specified node row, enforcing immutability.
pub(crate) fn insert_node_row(
    conn: &Connection,
    node_hash: &Bytes32,
    node_type: NodeType,
    left: Option<&Bytes32>,
    right: Option<&Bytes32>,
    key: Option<&[u8]>,
    value: Option<&[u8]>,
) -> StoreResult<()> {
    match fetch_row(conn, node_hash.as_slice())? {
        None => {
            conn.execute(
                r#"
                INSERT INTO node(hash, node_type, left, right, key, value)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    node_hash.as_slice(),
                    node_type as i64,
                    left.map(|h| h.as_slice()),
                    right.map(|h| h.as_slice()),
                    key,
                    value,
                ],
            )?;
            Ok(())
        }
        Some((_, existing_type, existing_left, existing_right, existing_key, existing_value)) => {
            let same = existing_type == node_type as i64
                && existing_left.as_deref() == left.map(|h| h.as_slice())
                && existing_right.as_deref() == right.map(|h| h.as_slice())
                && existing_key.as_deref() == key
                && existing_value.as_deref() == value;

            if same {
                Ok(())
            } else {
                Err(StoreError::NodeConflict { hash: *node_hash })
            }
        }
    }
}

pub(crate) fn insert_internal_node(
    conn: &Connection,
    left_hash: &Bytes32,
    right_hash: &Bytes32,
) -> StoreResult<Bytes32> {
    let node_hash = internal_hash(left_hash, right_hash);
    insert_node_row(
        conn,
        &node_hash,
        NodeType::Internal,
        Some(left_hash),
        Some(right_hash),
        None,
        None,
    )?;
    Ok(node_hash)
}

pub(crate) fn insert_terminal_node(conn: &Connection, key: &[u8], value: &[u8]) -> StoreResult<Bytes32> {
    let node_hash = leaf_hash(key, value);
    insert_node_row(
        conn,
        &node_hash,
        NodeType::Terminal,
        None,
        None,
        Some(key),
        Some(value),
    )?;
    Ok(node_hash)
}

// Integrity self-checks. Each collects every offending hash before failing
// so the report names all of them at once.

fn collect_hashes(conn: &Connection, sql: &str) -> StoreResult<Vec<Bytes32>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

    let mut hashes = Vec::new();
    for row in rows {
        hashes.push(blob32(row?)?);
    }
    Ok(hashes)
}

fn check_internal_key_value_are_null(conn: &Connection) -> StoreResult<()> {
    let hashes = collect_hashes(
        conn,
        "SELECT hash FROM node WHERE node_type = 1 AND (key IS NOT NULL OR value IS NOT NULL)",
    )?;
    if hashes.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Integrity {
            kind: IntegrityKind::InternalKeyValue,
            hashes,
        })
    }
}

fn check_internal_left_right_are_bytes32(conn: &Connection) -> StoreResult<()> {
    let hashes = collect_hashes(
        conn,
        "SELECT hash FROM node WHERE node_type = 1 AND (left IS NULL OR length(left) != 32
             OR right IS NULL OR length(right) != 32)",
    )?;
    if hashes.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Integrity {
            kind: IntegrityKind::InternalLeftRightBytes32,
            hashes,
        })
    }
}

fn check_terminal_left_right_are_null(conn: &Connection) -> StoreResult<()> {
    let hashes = collect_hashes(
        conn,
        "SELECT hash FROM node WHERE node_type = 2 AND (left IS NOT NULL OR right IS NOT NULL)",
    )?;
    if hashes.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Integrity {
            kind: IntegrityKind::TerminalLeftRight,
            hashes,
        })
    }
}

fn check_roots_are_incrementing(conn: &Connection) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "SELECT store_id, generation FROM root WHERE status = 2 ORDER BY store_id, generation",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)))?;

    let mut bad_stores = Vec::new();
    let mut current_store: Option<Bytes32> = None;
    let mut expected_generation = 0i64;

    for row in rows {
        let (raw_store, generation) = row?;
        let store = blob32(raw_store)?;

        if current_store != Some(store) {
            current_store = Some(store);
            expected_generation = 0;
        }

        if generation != expected_generation {
            if bad_stores.last() != Some(&store) {
                bad_stores.push(store);
            }
        }
        expected_generation = generation + 1;
    }

    if bad_stores.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Integrity {
            kind: IntegrityKind::RootsNotIncrementing,
            hashes: bad_stores,
        })
    }
}

fn check_hashes(conn: &Connection) -> StoreResult<()> {
    let mut stmt = conn.prepare("SELECT hash, node_type, left, right, key, value FROM node")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })?;

    let mut bad_hashes = Vec::new();
    for row in rows {
        let node = node_from_row(row?)?;
        let expected = match &node {
            Node::Internal(internal) => internal_hash(&internal.left_hash, &internal.right_hash),
            Node::Terminal(terminal) => leaf_hash(&terminal.key, &terminal.value),
        };
        if node.hash() != expected {
            bad_hashes.push(node.hash());
        }
    }

    if bad_hashes.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Integrity {
            kind: IntegrityKind::NodeHash,
            hashes: bad_hashes,
        })
    }
}
