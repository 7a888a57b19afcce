//! Root Registry
//!
//! Generation log per store. Committed generations are gapless from zero;
//! at most one pending root exists per store at any time. Promotion of a
//! pending root builds the sparse ancestor index for its generation.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{StoreError, StoreResult};
use super::{ancestors, nodes, DataStore};
use crate::types::{Bytes32, Root, Status};

impl DataStore {
    /// Create a store: generation 0 is the empty tree with no root hash.
    pub async fn create_store(&self, store_id: Bytes32, status: Status) -> StoreResult<Root> {
        self.with_writer(move |conn| {
            let existing: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM root WHERE store_id = ?1)",
                params![store_id.as_slice()],
                |row| row.get(0),
            )?;
            if existing {
                return Err(StoreError::StoreAlreadyExists { store_id });
            }
            insert_root(conn, &store_id, None, status)
        })
        .await
    }

    /// Append a root row, auto-incrementing the generation.
    pub async fn insert_root(
        &self,
        store_id: Bytes32,
        node_hash: Option<Bytes32>,
        status: Status,
    ) -> StoreResult<Root> {
        self.with_writer(move |conn| insert_root(conn, &store_id, node_hash.as_ref(), status))
            .await
    }

    /// Current committed generation of a store.
    pub async fn get_tree_generation(&self, store_id: &Bytes32) -> StoreResult<u64> {
        self.read(|conn| get_tree_generation(conn, store_id))
    }

    /// Committed root at a generation, latest when unspecified.
    pub async fn get_tree_root(
        &self,
        store_id: &Bytes32,
        generation: Option<u64>,
    ) -> StoreResult<Root> {
        self.read(|conn| get_tree_root(conn, store_id, generation))
    }

    /// The store's single non-committed root, if one exists.
    pub async fn get_pending_root(&self, store_id: &Bytes32) -> StoreResult<Option<Root>> {
        self.read(|conn| get_pending_root(conn, store_id))
    }

    /// Committed roots with `generation_begin <= generation < generation_end`.
    pub async fn get_roots_between(
        &self,
        store_id: &Bytes32,
        generation_begin: u64,
        generation_end: u64,
    ) -> StoreResult<Vec<Root>> {
        self.read(|conn| get_roots_between(conn, store_id, generation_begin, generation_end))
    }

    /// Most recent root carrying the given hash (null hash for the empty
    /// tree), optionally below a maximum generation.
    pub async fn get_last_root_by_hash(
        &self,
        store_id: &Bytes32,
        node_hash: Option<Bytes32>,
        max_generation: Option<u64>,
    ) -> StoreResult<Option<Root>> {
        self.read(|conn| get_last_root_by_hash(conn, store_id, node_hash.as_ref(), max_generation))
    }

    /// Change a root's status. Promotion to committed records the root's
    /// null-ancestor row and builds the ancestor table for its generation.
    pub async fn change_root_status(&self, root: Root, new_status: Status) -> StoreResult<()> {
        self.with_writer(move |conn| change_root_status(conn, &root, new_status)).await
    }

    /// Drop all non-committed roots of a store.
    pub async fn clear_pending_roots(&self, store_id: &Bytes32) -> StoreResult<()> {
        let store_id = *store_id;
        self.with_writer(move |conn| clear_pending_roots(conn, &store_id)).await
    }

    /// Delete roots and ancestor rows above the target generation.
    /// Idempotent; committed generations `[0..target]` stay intact.
    pub async fn rollback_to_generation(
        &self,
        store_id: &Bytes32,
        target_generation: u64,
    ) -> StoreResult<()> {
        let store_id = *store_id;
        self.with_writer(move |conn| rollback_to_generation(conn, &store_id, target_generation))
            .await
    }

    /// Re-commit the current root `shift_size` times.
    ///
    /// Pads the local generation count so it lines up with an external
    /// advertisement history that repeated a root.
    pub async fn shift_root_generations(
        &self,
        store_id: &Bytes32,
        shift_size: u64,
    ) -> StoreResult<()> {
        let store_id = *store_id;
        self.with_writer(move |conn| {
            let root = get_tree_root(conn, &store_id, None)?;
            for _ in 0..shift_size {
                insert_root(conn, &store_id, root.node_hash.as_ref(), Status::Committed)?;
            }
            Ok(())
        })
        .await
    }

    /// True when the store has at least one committed root.
    pub async fn store_id_exists(&self, store_id: &Bytes32) -> StoreResult<bool> {
        self.read(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM root WHERE store_id = ?1 AND status = ?2)",
                params![store_id.as_slice(), Status::Committed as i64],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Every store id present in the root registry.
    pub async fn get_store_ids(&self) -> StoreResult<Vec<Bytes32>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT store_id FROM root ORDER BY store_id")?;
            let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

            let mut store_ids = Vec::new();
            for row in rows {
                store_ids.push(nodes::blob32(row?)?);
            }
            Ok(store_ids)
        })
    }

    /// True when the current committed tree has no nodes.
    pub async fn table_is_empty(&self, store_id: &Bytes32) -> StoreResult<bool> {
        self.read(|conn| Ok(get_tree_root(conn, store_id, None)?.node_hash.is_none()))
    }
}

pub(crate) fn get_tree_generation_opt(conn: &Connection, store_id: &Bytes32) -> StoreResult<Option<u64>> {
    let generation: Option<i64> = conn.query_row(
        "SELECT MAX(generation) FROM root WHERE store_id = ?1 AND status = ?2",
        params![store_id.as_slice(), Status::Committed as i64],
        |row| row.get(0),
    )?;
    Ok(generation.map(|g| g as u64))
}

pub(crate) fn get_tree_generation(conn: &Connection, store_id: &Bytes32) -> StoreResult<u64> {
    get_tree_generation_opt(conn, store_id)?.ok_or(StoreError::UnknownStore { store_id: *store_id })
}

type RootRow = (Vec<u8>, i64, Option<Vec<u8>>, i64);

fn root_from_row(row: RootRow) -> StoreResult<Root> {
    let (store_id, generation, node_hash, status) = row;
    Ok(Root {
        store_id: nodes::blob32(store_id)?,
        generation: generation as u64,
        node_hash: node_hash.map(nodes::blob32).transpose()?,
        status: Status::from_i64(status)
            .ok_or_else(|| StoreError::Internal(format!("unknown root status: {}", status)))?,
    })
}

const ROOT_COLUMNS: &str = "store_id, generation, node_hash, status";

pub(crate) fn get_tree_root(
    conn: &Connection,
    store_id: &Bytes32,
    generation: Option<u64>,
) -> StoreResult<Root> {
    let generation = match generation {
        Some(generation) => generation,
        None => get_tree_generation(conn, store_id)?,
    };

    let row: Option<RootRow> = conn
        .query_row(
            &format!(
                "SELECT {} FROM root WHERE store_id = ?1 AND generation = ?2 AND status = ?3",
                ROOT_COLUMNS
            ),
            params![store_id.as_slice(), generation as i64, Status::Committed as i64],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    match row {
        Some(row) => root_from_row(row),
        None => Err(StoreError::UnknownStore { store_id: *store_id }),
    }
}

pub(crate) fn get_pending_root(conn: &Connection, store_id: &Bytes32) -> StoreResult<Option<Root>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM root WHERE store_id = ?1 AND status IN (?2, ?3)",
        ROOT_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![
            store_id.as_slice(),
            Status::Pending as i64,
            Status::PendingBatch as i64
        ],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let mut pending = None;
    for row in rows {
        if pending.is_some() {
            return Err(StoreError::MultiplePendingRoots { store_id: *store_id });
        }
        pending = Some(root_from_row(row?)?);
    }
    Ok(pending)
}

pub(crate) fn insert_root(
    conn: &Connection,
    store_id: &Bytes32,
    node_hash: Option<&Bytes32>,
    status: Status,
) -> StoreResult<Root> {
    let generation = match get_tree_generation_opt(conn, store_id)? {
        Some(generation) => generation + 1,
        None => 0,
    };

    if status.is_pending() && get_pending_root(conn, store_id)?.is_some() {
        return Err(StoreError::MultiplePendingRoots { store_id: *store_id });
    }

    conn.execute(
        "INSERT INTO root(store_id, generation, node_hash, status) VALUES(?1, ?2, ?3, ?4)",
        params![
            store_id.as_slice(),
            generation as i64,
            node_hash.map(|h| h.as_slice()),
            status as i64
        ],
    )?;

    // The root node has no ancestor. The ancestor table only tracks
    // committed generations.
    if let (Some(node_hash), Status::Committed) = (node_hash, status) {
        ancestors::insert_ancestor_row(conn, node_hash, None, store_id, generation)?;
    }

    Ok(Root {
        store_id: *store_id,
        node_hash: node_hash.copied(),
        generation,
        status,
    })
}

/// Insert a root and, when committed, build its sparse ancestor rows.
pub(crate) fn insert_root_with_ancestors(
    conn: &Connection,
    store_id: &Bytes32,
    node_hash: Option<&Bytes32>,
    status: Status,
) -> StoreResult<Root> {
    let root = insert_root(conn, store_id, node_hash, status)?;
    if status == Status::Committed {
        ancestors::build_ancestor_table(conn, store_id, root.generation)?;
    }
    Ok(root)
}

pub(crate) fn change_root_status(conn: &Connection, root: &Root, new_status: Status) -> StoreResult<()> {
    let updated = conn.execute(
        "UPDATE root SET status = ?1 WHERE store_id = ?2 AND generation = ?3 AND status = ?4",
        params![
            new_status as i64,
            root.store_id.as_slice(),
            root.generation as i64,
            root.status as i64
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::Internal(format!(
            "no root to update for store {} generation {}",
            hex::encode(root.store_id),
            root.generation
        )));
    }

    if new_status == Status::Committed {
        if let Some(node_hash) = &root.node_hash {
            ancestors::insert_ancestor_row(conn, node_hash, None, &root.store_id, root.generation)?;
        }
        ancestors::build_ancestor_table(conn, &root.store_id, root.generation)?;
    }

    Ok(())
}

pub(crate) fn clear_pending_roots(conn: &Connection, store_id: &Bytes32) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM root WHERE store_id = ?1 AND status IN (?2, ?3)",
        params![
            store_id.as_slice(),
            Status::Pending as i64,
            Status::PendingBatch as i64
        ],
    )?;
    Ok(())
}

pub(crate) fn rollback_to_generation(
    conn: &Connection,
    store_id: &Bytes32,
    target_generation: u64,
) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM ancestors WHERE store_id = ?1 AND generation > ?2",
        params![store_id.as_slice(), target_generation as i64],
    )?;
    conn.execute(
        "DELETE FROM root WHERE store_id = ?1 AND generation > ?2",
        params![store_id.as_slice(), target_generation as i64],
    )?;
    Ok(())
}

pub(crate) fn get_roots_between(
    conn: &Connection,
    store_id: &Bytes32,
    generation_begin: u64,
    generation_end: u64,
) -> StoreResult<Vec<Root>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM root WHERE store_id = ?1 AND status = ?2
             AND generation >= ?3 AND generation < ?4 ORDER BY generation ASC",
        ROOT_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![
            store_id.as_slice(),
            Status::Committed as i64,
            generation_begin as i64,
            generation_end as i64
        ],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let mut roots = Vec::new();
    for row in rows {
        roots.push(root_from_row(row?)?);
    }
    Ok(roots)
}

pub(crate) fn get_last_root_by_hash(
    conn: &Connection,
    store_id: &Bytes32,
    node_hash: Option<&Bytes32>,
    max_generation: Option<u64>,
) -> StoreResult<Option<Root>> {
    let max_generation = max_generation.map(|g| g as i64).unwrap_or(i64::MAX);
    let row: Option<RootRow> = match node_hash {
        Some(node_hash) => conn
            .query_row(
                &format!(
                    "SELECT {} FROM root WHERE store_id = ?1 AND generation < ?2 AND node_hash = ?3
                         ORDER BY generation DESC LIMIT 1",
                    ROOT_COLUMNS
                ),
                params![store_id.as_slice(), max_generation, node_hash.as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                &format!(
                    "SELECT {} FROM root WHERE store_id = ?1 AND generation < ?2 AND node_hash IS NULL
                         ORDER BY generation DESC LIMIT 1",
                    ROOT_COLUMNS
                ),
                params![store_id.as_slice(), max_generation],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?,
    };

    row.map(root_from_row).transpose()
}
