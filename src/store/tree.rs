//! Tree Engine
//!
//! Mutations over the Merkle tree: leaf placement, path rebuild, deletes,
//! upserts and batch updates. Every mutation materializes the ancestor path
//! of the touched terminal, rebuilds the internal chain up to the root by
//! recomputing hashes pairwise, appends a root row, and (for committed
//! roots) records sparse ancestor rows for the new internals.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use super::error::{StoreError, StoreResult};
use super::{ancestors, nodes, roots, DataStore};
use crate::merkle::hash::leaf_hash;
use crate::merkle::proof::{ProofOfInclusion, ProofOfInclusionLayer};
use crate::types::{Bytes32, InternalNode, Node, Side, Status, TerminalNode, EMPTY_ROOT_HASH};

/// One entry of a batch changelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Insert {
        key: Vec<u8>,
        value: Vec<u8>,
        reference_node_hash: Option<Bytes32>,
        side: Option<Side>,
    },
    Delete {
        key: Vec<u8>,
    },
    Upsert {
        key: Vec<u8>,
        value: Vec<u8>,
    },
}

/// Key presence map threaded through batch operations so each step checks
/// against the in-memory state instead of re-scanning the tree.
type HintKeysValues = HashMap<Vec<u8>, Vec<u8>>;

impl DataStore {
    /// Insert a key/value pair at an automatically chosen position.
    ///
    /// The placement seed is the leaf hash itself: bit `i` selects the
    /// branch at depth `i` while descending to a terminal, and the first
    /// seed byte selects the side. This keeps the tree statistically
    /// balanced without any bookkeeping.
    pub async fn autoinsert(
        &self,
        key: &[u8],
        value: &[u8],
        store_id: Bytes32,
        status: Status,
    ) -> StoreResult<Bytes32> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.with_writer(move |conn| autoinsert(conn, &key, &value, &store_id, status, None)).await
    }

    /// Insert a key/value pair as the sibling of a reference terminal node.
    pub async fn insert(
        &self,
        key: &[u8],
        value: &[u8],
        store_id: Bytes32,
        reference_node_hash: Option<Bytes32>,
        side: Option<Side>,
        status: Status,
    ) -> StoreResult<Bytes32> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.with_writer(move |conn| {
            insert(
                conn,
                &key,
                &value,
                &store_id,
                reference_node_hash.as_ref(),
                side,
                status,
                None,
            )
        })
        .await
    }

    /// Remove a key. The removed leaf's sibling takes the parent's slot.
    pub async fn delete(
        &self,
        key: &[u8],
        store_id: Bytes32,
        status: Status,
    ) -> StoreResult<Option<Bytes32>> {
        let key = key.to_vec();
        self.with_writer(move |conn| delete(conn, &key, &store_id, status, None)).await
    }

    /// Insert the key when absent, replace its value in place when present.
    pub async fn upsert(
        &self,
        key: &[u8],
        new_value: &[u8],
        store_id: Bytes32,
        status: Status,
    ) -> StoreResult<Bytes32> {
        let key = key.to_vec();
        let new_value = new_value.to_vec();
        self.with_writer(move |conn| upsert(conn, &key, &new_value, &store_id, status, None)).await
    }

    /// Apply a changelist as one new generation.
    ///
    /// Steps run sequentially with committed status so they can reuse the
    /// single-step code paths, then every intermediate root is rolled back
    /// and a single root for the final state is inserted under the
    /// requested status. Returns the new root hash (`None` for a tree
    /// emptied by the batch).
    pub async fn insert_batch(
        &self,
        store_id: Bytes32,
        changelist: Vec<BatchOperation>,
        status: Status,
    ) -> StoreResult<Option<Bytes32>> {
        self.with_writer(move |conn| {
            let old_root = roots::get_tree_root(conn, &store_id, None)?;
            let mut hint: HintKeysValues = get_keys_values(conn, old_root.node_hash.as_ref())?
                .into_iter()
                .map(|node| (node.key, node.value))
                .collect();

            for change in &changelist {
                match change {
                    BatchOperation::Insert {
                        key,
                        value,
                        reference_node_hash,
                        side,
                    } => match (reference_node_hash, side) {
                        (None, None) => {
                            autoinsert(conn, key, value, &store_id, Status::Committed, Some(&mut hint))?;
                        }
                        (Some(reference), Some(side)) => {
                            insert(
                                conn,
                                key,
                                value,
                                &store_id,
                                Some(reference),
                                Some(*side),
                                Status::Committed,
                                Some(&mut hint),
                            )?;
                        }
                        _ => {
                            return Err(StoreError::Internal(
                                "provide both reference_node_hash and side, or neither".into(),
                            ))
                        }
                    },
                    BatchOperation::Delete { key } => {
                        delete(conn, key, &store_id, Status::Committed, Some(&mut hint))?;
                    }
                    BatchOperation::Upsert { key, value } => {
                        upsert(conn, key, value, &store_id, Status::Committed, Some(&mut hint))?;
                    }
                }
            }

            let result_root = roots::get_tree_root(conn, &store_id, None)?;
            // Intermediate generations are bookkeeping only; erase them and
            // commit the final state as a single step.
            roots::rollback_to_generation(conn, &store_id, old_root.generation)?;

            if result_root.node_hash == old_root.node_hash {
                return Err(StoreError::NoChange);
            }

            let new_root = roots::insert_root_with_ancestors(
                conn,
                &store_id,
                result_root.node_hash.as_ref(),
                status,
            )?;
            if new_root.generation != old_root.generation + 1 {
                return Err(StoreError::Internal(format!(
                    "unexpected generation after batch update: expected {}, got {}",
                    old_root.generation + 1,
                    new_root.generation
                )));
            }

            Ok(result_root.node_hash)
        })
        .await
    }

    /// Terminal nodes reachable from a root, left to right. `None` selects
    /// the current committed root; the zero hash denotes the empty tree.
    pub async fn get_keys_values(
        &self,
        store_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> StoreResult<Vec<TerminalNode>> {
        self.read(|conn| {
            let root_hash = resolve_root_hash(conn, &store_id, root_hash)?;
            get_keys_values(conn, root_hash.as_ref())
        })
    }

    /// Current key/value pairs as a map.
    pub async fn get_keys_values_dict(
        &self,
        store_id: Bytes32,
    ) -> StoreResult<HashMap<Vec<u8>, Vec<u8>>> {
        Ok(self
            .get_keys_values(store_id, None)
            .await?
            .into_iter()
            .map(|node| (node.key, node.value))
            .collect())
    }

    /// Internal nodes reachable from a root.
    pub async fn get_internal_nodes(
        &self,
        store_id: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> StoreResult<Vec<InternalNode>> {
        self.read(|conn| {
            let root_hash = resolve_root_hash(conn, &store_id, root_hash)?;
            match root_hash {
                None => Ok(Vec::new()),
                Some(root_hash) => get_internal_nodes(conn, &root_hash),
            }
        })
    }

    /// Terminal node holding a key in the current committed tree.
    pub async fn get_node_by_key(&self, key: &[u8], store_id: Bytes32) -> StoreResult<TerminalNode> {
        self.read(|conn| get_node_by_key(conn, &store_id, key))
    }

    /// Proof of inclusion for the node with the given hash, leaf to root.
    pub async fn proof_of_inclusion_by_hash(
        &self,
        node_hash: &Bytes32,
        store_id: Bytes32,
    ) -> StoreResult<ProofOfInclusion> {
        self.read(|conn| proof_of_inclusion_by_hash(conn, node_hash, &store_id))
    }

    /// Proof of inclusion for the terminal node holding a key.
    pub async fn proof_of_inclusion_by_key(
        &self,
        key: &[u8],
        store_id: Bytes32,
    ) -> StoreResult<ProofOfInclusion> {
        self.read(|conn| {
            let node = get_node_by_key(conn, &store_id, key)?;
            proof_of_inclusion_by_hash(conn, &node.hash, &store_id)
        })
    }

    /// Graphviz rendering of the current committed tree, for debugging.
    pub async fn tree_as_dot(&self, store_id: Bytes32) -> StoreResult<String> {
        self.read(|conn| {
            let root = roots::get_tree_root(conn, &store_id, None)?;
            let root_hash = match root.node_hash {
                None => return Ok("digraph {\n}".to_string()),
                Some(root_hash) => root_hash,
            };

            let mut lines = vec!["digraph {".to_string()];
            for node in get_keys_values(conn, Some(&root_hash))? {
                let hash = hex::encode(node.hash);
                lines.push(format!(
                    "node_{} [shape=box, label=\"{}\\nkey: {}\\nvalue: {}\"];",
                    hash,
                    &hash[..8],
                    hex::encode(&node.key),
                    hex::encode(&node.value),
                ));
            }
            for node in get_internal_nodes(conn, &root_hash)? {
                let hash = hex::encode(node.hash);
                lines.push(format!("node_{} [label=\"{}\"]", hash, &hash[..8]));
                lines.push(format!(
                    "node_{} -> node_{} [label=\"L\"];",
                    hash,
                    hex::encode(node.left_hash)
                ));
                lines.push(format!(
                    "node_{} -> node_{} [label=\"R\"];",
                    hash,
                    hex::encode(node.right_hash)
                ));
            }
            lines.push("}".to_string());
            Ok(lines.join("\n"))
        })
    }
}

/// Map an optional explicit root hash to the effective traversal root.
fn resolve_root_hash(
    conn: &Connection,
    store_id: &Bytes32,
    root_hash: Option<Bytes32>,
) -> StoreResult<Option<Bytes32>> {
    match root_hash {
        Some(hash) if hash == EMPTY_ROOT_HASH => Ok(None),
        Some(hash) => Ok(Some(hash)),
        None => Ok(roots::get_tree_root(conn, store_id, None)?.node_hash),
    }
}

pub(crate) fn get_keys_values(
    conn: &Connection,
    root_hash: Option<&Bytes32>,
) -> StoreResult<Vec<TerminalNode>> {
    let root_hash = match root_hash {
        None => return Ok(Vec::new()),
        Some(root_hash) => root_hash,
    };

    // The rank accumulator packs the left/right choices into a 63-bit
    // integer so ORDER BY yields the leaves left to right.
    let mut stmt = conn.prepare(
        r#"
        WITH RECURSIVE
            tree_from_root_hash(hash, node_type, left, right, key, value, depth, rights) AS (
                SELECT node.hash, node.node_type, node.left, node.right, node.key, node.value, 0, 0
                FROM node WHERE node.hash = ?1
                UNION ALL
                SELECT node.hash, node.node_type, node.left, node.right, node.key, node.value,
                       tree_from_root_hash.depth + 1,
                       CASE
                           WHEN node.hash = tree_from_root_hash.right
                           THEN tree_from_root_hash.rights + (1 << (62 - tree_from_root_hash.depth))
                           ELSE tree_from_root_hash.rights
                       END
                FROM node, tree_from_root_hash
                WHERE node.hash = tree_from_root_hash.left OR node.hash = tree_from_root_hash.right
            )
        SELECT hash, key, value, depth FROM tree_from_root_hash
        WHERE node_type = 2
        ORDER BY depth ASC, rights ASC
        "#,
    )?;
    let rows = stmt.query_map(params![root_hash.as_slice()], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, Option<Vec<u8>>>(1)?,
            row.get::<_, Option<Vec<u8>>>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut terminal_nodes = Vec::new();
    for row in rows {
        let (hash, key, value, depth) = row?;
        if depth > 62 {
            return Err(StoreError::TreeDepthExceeded);
        }
        terminal_nodes.push(TerminalNode {
            hash: nodes::blob32(hash)?,
            key: key.ok_or_else(|| StoreError::Internal("terminal node with null key".into()))?,
            value: value.ok_or_else(|| StoreError::Internal("terminal node with null value".into()))?,
        });
    }
    Ok(terminal_nodes)
}

pub(crate) fn get_internal_nodes(
    conn: &Connection,
    root_hash: &Bytes32,
) -> StoreResult<Vec<InternalNode>> {
    let mut stmt = conn.prepare(
        r#"
        WITH RECURSIVE
            tree_from_root_hash(hash, node_type, left, right) AS (
                SELECT node.hash, node.node_type, node.left, node.right FROM node WHERE node.hash = ?1
                UNION ALL
                SELECT node.hash, node.node_type, node.left, node.right
                FROM node, tree_from_root_hash
                WHERE node.hash = tree_from_root_hash.left OR node.hash = tree_from_root_hash.right
            )
        SELECT hash, left, right FROM tree_from_root_hash WHERE node_type = 1
        "#,
    )?;
    let rows = stmt.query_map(params![root_hash.as_slice()], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, Option<Vec<u8>>>(1)?,
            row.get::<_, Option<Vec<u8>>>(2)?,
        ))
    })?;

    let mut internal_nodes = Vec::new();
    for row in rows {
        let (hash, left, right) = row?;
        internal_nodes.push(InternalNode {
            hash: nodes::blob32(hash)?,
            left_hash: nodes::blob32(
                left.ok_or_else(|| StoreError::Internal("internal node with null left".into()))?,
            )?,
            right_hash: nodes::blob32(
                right.ok_or_else(|| StoreError::Internal("internal node with null right".into()))?,
            )?,
        });
    }
    Ok(internal_nodes)
}

pub(crate) fn get_node_by_key(
    conn: &Connection,
    store_id: &Bytes32,
    key: &[u8],
) -> StoreResult<TerminalNode> {
    let root = roots::get_tree_root(conn, store_id, None)?;
    for node in get_keys_values(conn, root.node_hash.as_ref())? {
        if node.key == key {
            return Ok(node);
        }
    }
    Err(StoreError::KeyNotFound { key: key.to_vec() })
}

/// Descend from the root following the seed bits until a terminal node.
fn get_terminal_node_for_seed(
    conn: &Connection,
    store_id: &Bytes32,
    seed: &Bytes32,
) -> StoreResult<Option<Bytes32>> {
    let root = roots::get_tree_root(conn, store_id, None)?;
    let mut node_hash = match root.node_hash {
        None => return Ok(None),
        Some(node_hash) => node_hash,
    };

    let mut bit_index = 0usize;
    loop {
        match nodes::get_node(conn, &node_hash)? {
            Node::Terminal(_) => return Ok(Some(node_hash)),
            Node::Internal(node) => {
                // Bit i of the seed, taken little-endian from the integer
                // reading of the 32 bytes.
                let byte = seed[31 - bit_index / 8];
                let bit = (byte >> (bit_index % 8)) & 1;
                node_hash = if bit == 0 { node.left_hash } else { node.right_hash };
                bit_index += 1;
            }
        }
    }
}

fn get_side_for_seed(seed: &Bytes32) -> Side {
    if seed[0] < 128 {
        Side::Left
    } else {
        Side::Right
    }
}

pub(crate) fn autoinsert(
    conn: &Connection,
    key: &[u8],
    value: &[u8],
    store_id: &Bytes32,
    status: Status,
    hint: Option<&mut HintKeysValues>,
) -> StoreResult<Bytes32> {
    let was_empty = roots::get_tree_root(conn, store_id, None)?.node_hash.is_none();
    let (reference_node_hash, side) = if was_empty {
        (None, None)
    } else {
        let seed = leaf_hash(key, value);
        (
            get_terminal_node_for_seed(conn, store_id, &seed)?,
            Some(get_side_for_seed(&seed)),
        )
    };

    insert(conn, key, value, store_id, reference_node_hash.as_ref(), side, status, hint)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert(
    conn: &Connection,
    key: &[u8],
    value: &[u8],
    store_id: &Bytes32,
    reference_node_hash: Option<&Bytes32>,
    side: Option<Side>,
    status: Status,
    hint: Option<&mut HintKeysValues>,
) -> StoreResult<Bytes32> {
    let root = roots::get_tree_root(conn, store_id, None)?;
    let was_empty = root.node_hash.is_none();

    if !was_empty {
        let key_present = match hint.as_deref() {
            Some(map) => map.contains_key(key),
            None => get_keys_values(conn, root.node_hash.as_ref())?
                .iter()
                .any(|node| node.key == key),
        };
        if key_present {
            return Err(StoreError::KeyAlreadyPresent { key: key.to_vec() });
        }
    }

    if let Some(reference) = reference_node_hash {
        if nodes::get_node_type(conn, reference)? == crate::types::NodeType::Internal {
            return Err(StoreError::Internal(
                "can not insert a new key/value on an internal node".into(),
            ));
        }
    }

    let new_terminal_node_hash = nodes::insert_terminal_node(conn, key, value)?;

    if was_empty {
        if side.is_some() {
            return Err(StoreError::Internal(
                "tree was empty so side must be unspecified".into(),
            ));
        }
        roots::insert_root(conn, store_id, Some(&new_terminal_node_hash), status)?;
    } else {
        let side = side.ok_or_else(|| {
            StoreError::Internal("tree was not empty, side must be specified".into())
        })?;
        let reference = *reference_node_hash.ok_or_else(|| {
            StoreError::Internal("tree was not empty, reference node hash must be specified".into())
        })?;

        let chain = ancestors::get_ancestors_optimized(conn, &reference, store_id, None)?;
        if chain.len() >= 62 {
            return Err(StoreError::TreeDepthExceeded);
        }

        let (mut left, mut right) = match side {
            Side::Left => (new_terminal_node_hash, reference),
            Side::Right => (reference, new_terminal_node_hash),
        };

        let new_generation = root.generation + 1;
        // Ancestor rows are written after the new root so the table
        // constraints stay satisfied.
        let mut pending_parent_rows: Vec<(Bytes32, Bytes32)> = Vec::new();
        let mut new_hash = nodes::insert_internal_node(conn, &left, &right)?;
        pending_parent_rows.push((left, right));
        let mut traversal_node_hash = reference;

        for ancestor in &chain {
            if ancestor.left_hash == traversal_node_hash {
                left = new_hash;
                right = ancestor.right_hash;
            } else if ancestor.right_hash == traversal_node_hash {
                left = ancestor.left_hash;
                right = new_hash;
            } else {
                return Err(StoreError::Internal("broken ancestor chain during insert".into()));
            }

            traversal_node_hash = ancestor.hash;
            new_hash = nodes::insert_internal_node(conn, &left, &right)?;
            pending_parent_rows.push((left, right));
        }

        roots::insert_root(conn, store_id, Some(&new_hash), status)?;
        if status == Status::Committed {
            for (left_hash, right_hash) in pending_parent_rows {
                ancestors::record_parent(conn, &left_hash, &right_hash, store_id, new_generation)?;
            }
        }
    }

    if let Some(map) = hint {
        map.insert(key.to_vec(), value.to_vec());
    }
    Ok(new_terminal_node_hash)
}

pub(crate) fn delete(
    conn: &Connection,
    key: &[u8],
    store_id: &Bytes32,
    status: Status,
    hint: Option<&mut HintKeysValues>,
) -> StoreResult<Option<Bytes32>> {
    let node = match hint.as_deref() {
        Some(map) => {
            let value = map
                .get(key)
                .ok_or_else(|| StoreError::KeyNotFound { key: key.to_vec() })?;
            TerminalNode {
                hash: leaf_hash(key, value),
                key: key.to_vec(),
                value: value.clone(),
            }
        }
        None => get_node_by_key(conn, store_id, key)?,
    };

    let chain = ancestors::get_ancestors_optimized(conn, &node.hash, store_id, None)?;
    if chain.len() > 62 {
        return Err(StoreError::TreeDepthExceeded);
    }

    let new_root_hash = if chain.is_empty() {
        // The only node is being deleted.
        roots::insert_root(conn, store_id, None, status)?;
        None
    } else {
        let parent = &chain[0];
        let other_hash = parent
            .other_child_hash(&node.hash)
            .ok_or_else(|| StoreError::Internal("parent does not reference deleted node".into()))?;

        if chain.len() == 1 {
            // The parent is the root, so the sibling becomes the new root.
            roots::insert_root(conn, store_id, Some(&other_hash), status)?;
            Some(other_hash)
        } else {
            let mut old_child_hash = parent.hash;
            let mut new_child_hash = other_hash;
            let new_generation = roots::get_tree_generation(conn, store_id)? + 1;
            let mut pending_parent_rows: Vec<(Bytes32, Bytes32)> = Vec::new();

            for ancestor in &chain[1..] {
                let (left_hash, right_hash) = if ancestor.left_hash == old_child_hash {
                    (new_child_hash, ancestor.right_hash)
                } else if ancestor.right_hash == old_child_hash {
                    (ancestor.left_hash, new_child_hash)
                } else {
                    return Err(StoreError::Internal("broken ancestor chain during delete".into()));
                };

                new_child_hash = nodes::insert_internal_node(conn, &left_hash, &right_hash)?;
                pending_parent_rows.push((left_hash, right_hash));
                old_child_hash = ancestor.hash;
            }

            roots::insert_root(conn, store_id, Some(&new_child_hash), status)?;
            if status == Status::Committed {
                for (left_hash, right_hash) in pending_parent_rows {
                    ancestors::record_parent(conn, &left_hash, &right_hash, store_id, new_generation)?;
                }
            }
            Some(new_child_hash)
        }
    };

    if let Some(map) = hint {
        map.remove(key);
    }
    Ok(new_root_hash)
}

pub(crate) fn upsert(
    conn: &Connection,
    key: &[u8],
    new_value: &[u8],
    store_id: &Bytes32,
    status: Status,
    hint: Option<&mut HintKeysValues>,
) -> StoreResult<Bytes32> {
    let existing = match hint.as_deref() {
        Some(map) => map.get(key).map(|value| TerminalNode {
            hash: leaf_hash(key, value),
            key: key.to_vec(),
            value: value.clone(),
        }),
        None => match get_node_by_key(conn, store_id, key) {
            Ok(node) => Some(node),
            Err(StoreError::KeyNotFound { .. }) => None,
            Err(error) => return Err(error),
        },
    };

    let old_node = match existing {
        None => return autoinsert(conn, key, new_value, store_id, status, hint),
        Some(old_node) => old_node,
    };

    if old_node.value == new_value {
        // Replacing a value with itself must not advance the root.
        return Ok(old_node.hash);
    }

    let chain = ancestors::get_ancestors_optimized(conn, &old_node.hash, store_id, None)?;
    let new_terminal_node_hash = nodes::insert_terminal_node(conn, key, new_value)?;
    let new_generation = roots::get_tree_generation(conn, store_id)? + 1;

    // Replace the leaf in place and rebuild the chain above it.
    let mut pending_parent_rows: Vec<(Bytes32, Bytes32)> = Vec::new();
    let mut new_hash = new_terminal_node_hash;
    let mut traversal_node_hash = old_node.hash;

    for ancestor in &chain {
        let (left_hash, right_hash) = if ancestor.left_hash == traversal_node_hash {
            (new_hash, ancestor.right_hash)
        } else if ancestor.right_hash == traversal_node_hash {
            (ancestor.left_hash, new_hash)
        } else {
            return Err(StoreError::Internal("broken ancestor chain during upsert".into()));
        };

        traversal_node_hash = ancestor.hash;
        new_hash = nodes::insert_internal_node(conn, &left_hash, &right_hash)?;
        pending_parent_rows.push((left_hash, right_hash));
    }

    roots::insert_root(conn, store_id, Some(&new_hash), status)?;
    if status == Status::Committed {
        for (left_hash, right_hash) in pending_parent_rows {
            ancestors::record_parent(conn, &left_hash, &right_hash, store_id, new_generation)?;
        }
    }

    if let Some(map) = hint {
        map.insert(key.to_vec(), new_value.to_vec());
    }
    Ok(new_terminal_node_hash)
}

pub(crate) fn proof_of_inclusion_by_hash(
    conn: &Connection,
    node_hash: &Bytes32,
    store_id: &Bytes32,
) -> StoreResult<ProofOfInclusion> {
    let chain = ancestors::get_ancestors(conn, node_hash, store_id, None)?;

    let mut layers = Vec::with_capacity(chain.len());
    let mut child_hash = *node_hash;
    for parent in &chain {
        let layer = ProofOfInclusionLayer::from_internal_node(parent, &child_hash)
            .ok_or_else(|| StoreError::Internal("parent does not reference proof child".into()))?;
        layers.push(layer);
        child_hash = parent.hash;
    }

    Ok(ProofOfInclusion {
        node_hash: *node_hash,
        layers,
    })
}
