//! Sparse Ancestor Index
//!
//! Records "parent of X at generation g" rows, inserted only when the
//! relation first changes. A lookup takes the row with the largest
//! generation at or below the queried one, so shared subtrees cost nothing
//! per generation. Identical re-inserts are de-duplicated; a row that
//! contradicts an earlier one is rejected.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{StoreError, StoreResult};
use super::{nodes, roots, tree, DataStore};
use crate::merkle::hash::internal_hash;
use crate::types::{Bytes32, InternalNode, Node};

impl DataStore {
    /// Parent of a node at a generation (defaults to the latest committed).
    /// `None` when the node is the root at that generation.
    pub async fn one_ancestor(
        &self,
        node_hash: &Bytes32,
        store_id: &Bytes32,
        generation: Option<u64>,
    ) -> StoreResult<Option<InternalNode>> {
        self.read(|conn| get_one_ancestor(conn, node_hash, store_id, generation))
    }

    /// Ancestor chain from a node to the root via the sparse index.
    pub async fn get_ancestors_optimized(
        &self,
        node_hash: &Bytes32,
        store_id: Bytes32,
        generation: Option<u64>,
    ) -> StoreResult<Vec<InternalNode>> {
        self.read(|conn| get_ancestors_optimized(conn, node_hash, &store_id, generation))
    }

    /// Ancestor chain derived exhaustively from the node table. Reference
    /// implementation for the sparse index.
    pub async fn get_ancestors(
        &self,
        node_hash: &Bytes32,
        store_id: Bytes32,
        generation: Option<u64>,
    ) -> StoreResult<Vec<InternalNode>> {
        self.read(|conn| get_ancestors(conn, node_hash, &store_id, generation))
    }

    /// First generation at which a node appeared in a store, if any.
    pub async fn get_first_generation(
        &self,
        node_hash: &Bytes32,
        store_id: &Bytes32,
    ) -> StoreResult<Option<u64>> {
        self.read(|conn| get_first_generation(conn, node_hash, store_id))
    }
}

pub(crate) fn insert_ancestor_row(
    conn: &Connection,
    node_hash: &Bytes32,
    ancestor: Option<&Bytes32>,
    store_id: &Bytes32,
    generation: u64,
) -> StoreResult<()> {
    let existing: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT ancestor FROM ancestors WHERE hash = ?1 AND store_id = ?2 AND generation = ?3",
            params![node_hash.as_slice(), store_id.as_slice(), generation as i64],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO ancestors(hash, ancestor, store_id, generation) VALUES(?1, ?2, ?3, ?4)",
                params![
                    node_hash.as_slice(),
                    ancestor.map(|h| h.as_slice()),
                    store_id.as_slice(),
                    generation as i64
                ],
            )?;
            Ok(())
        }
        Some(existing_ancestor) => {
            let existing_ancestor = existing_ancestor.map(nodes::blob32).transpose()?;
            if existing_ancestor == ancestor.copied() {
                Ok(())
            } else {
                Err(StoreError::AncestorConflict { hash: *node_hash })
            }
        }
    }
}

/// Record both children of an internal node for a generation.
pub(crate) fn record_parent(
    conn: &Connection,
    left_hash: &Bytes32,
    right_hash: &Bytes32,
    store_id: &Bytes32,
    generation: u64,
) -> StoreResult<()> {
    let parent_hash = internal_hash(left_hash, right_hash);
    for child in [left_hash, right_hash] {
        insert_ancestor_row(conn, child, Some(&parent_hash), store_id, generation)?;
    }
    Ok(())
}

pub(crate) fn get_one_ancestor(
    conn: &Connection,
    node_hash: &Bytes32,
    store_id: &Bytes32,
    generation: Option<u64>,
) -> StoreResult<Option<InternalNode>> {
    let generation = match generation {
        Some(generation) => generation,
        None => roots::get_tree_generation(conn, store_id)?,
    };

    let ancestor: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT ancestor FROM ancestors
                 WHERE hash = ?1 AND store_id = ?2 AND generation <= ?3
                 ORDER BY generation DESC LIMIT 1",
            params![node_hash.as_slice(), store_id.as_slice(), generation as i64],
            |row| row.get(0),
        )
        .optional()?;

    match ancestor {
        None | Some(None) => Ok(None),
        Some(Some(raw)) => {
            let ancestor_hash = nodes::blob32(raw)?;
            match nodes::get_node(conn, &ancestor_hash)? {
                Node::Internal(node) => Ok(Some(node)),
                Node::Terminal(_) => Err(StoreError::Internal(format!(
                    "ancestor row points at a terminal node: {}",
                    hex::encode(ancestor_hash)
                ))),
            }
        }
    }
}

pub(crate) fn get_ancestors_optimized(
    conn: &Connection,
    node_hash: &Bytes32,
    store_id: &Bytes32,
    generation: Option<u64>,
) -> StoreResult<Vec<InternalNode>> {
    let generation = match generation {
        Some(generation) => generation,
        None => roots::get_tree_generation(conn, store_id)?,
    };
    let root = roots::get_tree_root(conn, store_id, Some(generation))?;
    let root_hash = match root.node_hash {
        None => return Ok(Vec::new()),
        Some(root_hash) => root_hash,
    };

    let mut chain = Vec::new();
    let mut current = *node_hash;
    while let Some(ancestor) = get_one_ancestor(conn, &current, store_id, Some(generation))? {
        current = ancestor.hash;
        chain.push(ancestor);
    }

    if let Some(top) = chain.last() {
        if top.hash != root_hash {
            return Err(StoreError::Internal(
                "ancestor chain did not end at the tree root".into(),
            ));
        }
    }

    Ok(chain)
}

pub(crate) fn get_ancestors(
    conn: &Connection,
    node_hash: &Bytes32,
    store_id: &Bytes32,
    generation: Option<u64>,
) -> StoreResult<Vec<InternalNode>> {
    let root = roots::get_tree_root(conn, store_id, generation)?;
    let root_hash = root.node_hash.ok_or_else(|| {
        StoreError::Internal(format!(
            "root hash is unspecified for store: {}",
            hex::encode(store_id)
        ))
    })?;

    let mut stmt = conn.prepare(
        r#"
        WITH RECURSIVE
            tree_from_root_hash(hash, left, right, depth) AS (
                SELECT node.hash, node.left, node.right, 0 FROM node WHERE node.hash = ?1
                UNION ALL
                SELECT node.hash, node.left, node.right, tree_from_root_hash.depth + 1
                FROM node, tree_from_root_hash
                WHERE node.hash = tree_from_root_hash.left OR node.hash = tree_from_root_hash.right
            ),
            ancestors(hash) AS (
                SELECT node.hash FROM node WHERE node.left = ?2 OR node.right = ?2
                UNION
                SELECT node.hash FROM node, ancestors
                WHERE node.left = ancestors.hash OR node.right = ancestors.hash
            )
        SELECT tree_from_root_hash.hash, tree_from_root_hash.left, tree_from_root_hash.right
        FROM tree_from_root_hash INNER JOIN ancestors ON tree_from_root_hash.hash = ancestors.hash
        ORDER BY tree_from_root_hash.depth DESC
        "#,
    )?;
    let rows = stmt.query_map(params![root_hash.as_slice(), node_hash.as_slice()], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, Option<Vec<u8>>>(1)?,
            row.get::<_, Option<Vec<u8>>>(2)?,
        ))
    })?;

    let mut chain = Vec::new();
    for row in rows {
        let (hash, left, right) = row?;
        chain.push(InternalNode {
            hash: nodes::blob32(hash)?,
            left_hash: nodes::blob32(
                left.ok_or_else(|| StoreError::Internal("ancestor with null left".into()))?,
            )?,
            right_hash: nodes::blob32(
                right.ok_or_else(|| StoreError::Internal("ancestor with null right".into()))?,
            )?,
        });
    }
    Ok(chain)
}

/// Sparse build for a freshly committed generation: insert parent rows only
/// for internal nodes that were not reachable from the previous root.
pub(crate) fn build_ancestor_table(
    conn: &Connection,
    store_id: &Bytes32,
    generation: u64,
) -> StoreResult<()> {
    let root = roots::get_tree_root(conn, store_id, Some(generation))?;
    let root_hash = match root.node_hash {
        None => return Ok(()),
        Some(root_hash) => root_hash,
    };

    let previous_root = roots::get_tree_root(conn, store_id, Some(generation.saturating_sub(1)))?;
    let known_hashes: HashSet<Bytes32> = match previous_root.node_hash {
        Some(previous_hash) if generation > 0 => tree::get_internal_nodes(conn, &previous_hash)?
            .into_iter()
            .map(|node| node.hash)
            .collect(),
        _ => HashSet::new(),
    };

    for node in tree::get_internal_nodes(conn, &root_hash)? {
        if !known_hashes.contains(&node.hash) {
            record_parent(conn, &node.left_hash, &node.right_hash, store_id, generation)?;
        }
    }
    Ok(())
}

pub(crate) fn get_first_generation(
    conn: &Connection,
    node_hash: &Bytes32,
    store_id: &Bytes32,
) -> StoreResult<Option<u64>> {
    let generation: Option<i64> = conn.query_row(
        "SELECT MIN(generation) FROM ancestors WHERE hash = ?1 AND store_id = ?2",
        params![node_hash.as_slice(), store_id.as_slice()],
        |row| row.get(0),
    )?;
    Ok(generation.map(|g| g as u64))
}
