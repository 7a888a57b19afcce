//! SQLite Persistent Store
//!
//! Durable storage for the node table, root registry, ancestor index and
//! subscription registry. Uses connection pooling via r2d2. Public methods
//! are async and delegate to synchronous helpers running on pooled
//! connections; mutations run inside a transaction under a single writer
//! lock, so readers can proceed against a consistent snapshot while exactly
//! one writer is active.

pub mod ancestors;
pub mod diff;
pub mod error;
pub mod nodes;
pub mod roots;
pub mod subscriptions;
pub mod tree;

pub use diff::{DiffData, OperationType};
pub use error::{IntegrityKind, StoreError, StoreResult};
pub use tree::BatchOperation;

use std::collections::HashSet;
use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tokio::sync::Mutex;

use crate::types::Bytes32;

/// SQLite-backed data store with connection pooling.
pub struct DataStore {
    pool: Pool<SqliteConnectionManager>,
    write_lock: Mutex<()>,
}

impl DataStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool.
    pub(crate) fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| StoreError::Connection(e.to_string()))
    }

    /// Run a read-only operation on a pooled connection.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let conn = self.conn()?;
        f(&conn)
    }

    /// Run a mutation inside a transaction under the writer lock.
    ///
    /// The transaction commits only when the closure succeeds; any error
    /// rolls the whole mutation back.
    pub(crate) async fn with_writer<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(result)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS node(
                hash BLOB PRIMARY KEY NOT NULL CHECK(length(hash) = 32),
                node_type INTEGER NOT NULL CHECK(node_type IN (1, 2)),
                left BLOB REFERENCES node CHECK(left IS NULL OR length(left) = 32),
                right BLOB REFERENCES node CHECK(right IS NULL OR length(right) = 32),
                key BLOB,
                value BLOB
            );

            CREATE TABLE IF NOT EXISTS root(
                store_id BLOB NOT NULL CHECK(length(store_id) = 32),
                generation INTEGER NOT NULL CHECK(generation >= 0),
                node_hash BLOB CHECK(node_hash IS NULL OR length(node_hash) = 32),
                status INTEGER NOT NULL CHECK(status IN (1, 2, 3)),
                PRIMARY KEY(status, store_id, generation),
                FOREIGN KEY(node_hash) REFERENCES node(hash)
            );

            CREATE TABLE IF NOT EXISTS ancestors(
                hash BLOB NOT NULL REFERENCES node CHECK(length(hash) = 32),
                ancestor BLOB CHECK(ancestor IS NULL OR length(ancestor) = 32),
                store_id BLOB NOT NULL CHECK(length(store_id) = 32),
                generation INTEGER NOT NULL CHECK(generation >= 0),
                PRIMARY KEY(hash, store_id, generation),
                FOREIGN KEY(ancestor) REFERENCES node(hash)
            );

            CREATE TABLE IF NOT EXISTS subscriptions(
                store_id BLOB NOT NULL CHECK(length(store_id) = 32),
                url TEXT NOT NULL,
                ignore_till INTEGER NOT NULL DEFAULT 0 CHECK(ignore_till >= 0),
                num_consecutive_failures INTEGER NOT NULL DEFAULT 0 CHECK(num_consecutive_failures >= 0),
                PRIMARY KEY(store_id, url)
            );

            CREATE TABLE IF NOT EXISTS wallet_generation(
                store_id BLOB PRIMARY KEY NOT NULL CHECK(length(store_id) = 32),
                generation INTEGER NOT NULL CHECK(generation >= 0)
            );

            CREATE INDEX IF NOT EXISTS root_node_hash ON root(node_hash);
            CREATE INDEX IF NOT EXISTS node_left ON node(left);
            CREATE INDEX IF NOT EXISTS node_right ON node(right);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Remove every row that only this store references.
    ///
    /// Nodes shared with other stores stay untouched, as do other stores'
    /// roots (pending ones included). Safe to call at any time; the whole
    /// removal is one transaction.
    pub async fn delete_store_data(&self, store_id: Bytes32) -> StoreResult<()> {
        self.with_writer(|conn| {
            let this_store = reachable_hashes(conn, &store_id, true)?;
            let other_stores = reachable_hashes(conn, &store_id, false)?;

            conn.execute(
                "DELETE FROM ancestors WHERE store_id = ?1",
                params![store_id.as_slice()],
            )?;
            conn.execute(
                "DELETE FROM root WHERE store_id = ?1",
                params![store_id.as_slice()],
            )?;
            conn.execute(
                "DELETE FROM wallet_generation WHERE store_id = ?1",
                params![store_id.as_slice()],
            )?;

            let mut remaining: Vec<&Bytes32> =
                this_store.difference(&other_stores).collect();

            // Parents must go before their children to satisfy the node
            // table's self references; iterate until a pass deletes nothing.
            loop {
                let mut kept = Vec::new();
                let mut deleted_any = false;

                for hash in remaining {
                    let referenced: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM node WHERE left = ?1 OR right = ?1)",
                        params![hash.as_slice()],
                        |row| row.get(0),
                    )?;

                    if referenced {
                        kept.push(hash);
                    } else {
                        conn.execute("DELETE FROM node WHERE hash = ?1", params![hash.as_slice()])?;
                        deleted_any = true;
                    }
                }

                if !deleted_any || kept.is_empty() {
                    break;
                }
                remaining = kept;
            }

            Ok(())
        })
        .await
    }
}

/// Connection-level pragmas applied to every pooled connection.
fn init_connection(conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Every node hash reachable from the roots of one store, or from the
/// roots of every other store when `of_store` is false.
fn reachable_hashes(
    conn: &rusqlite::Connection,
    store_id: &Bytes32,
    of_store: bool,
) -> StoreResult<HashSet<Bytes32>> {
    let comparison = if of_store { "=" } else { "!=" };
    let sql = format!(
        r#"
        WITH RECURSIVE reach(hash, left, right) AS (
            SELECT node.hash, node.left, node.right FROM node
            JOIN root ON root.node_hash = node.hash
            WHERE root.store_id {} ?1
            UNION
            SELECT node.hash, node.left, node.right FROM node, reach
            WHERE node.hash = reach.left OR node.hash = reach.right
        )
        SELECT hash FROM reach
        "#,
        comparison
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![store_id.as_slice()], |row| row.get::<_, Vec<u8>>(0))?;

    let mut hashes = HashSet::new();
    for row in rows {
        hashes.insert(nodes::blob32(row?)?);
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    fn store_id(byte: u8) -> Bytes32 {
        [byte; 32]
    }

    #[tokio::test]
    async fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");

        {
            let store = DataStore::new(&path).unwrap();
            store.create_store(store_id(1), Status::Committed).await.unwrap();
        }

        let store = DataStore::new(&path).unwrap();
        assert!(store.store_id_exists(&store_id(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_store_data_preserves_shared_nodes() {
        let store = DataStore::in_memory().unwrap();
        let first = store_id(1);
        let second = store_id(2);
        store.create_store(first, Status::Committed).await.unwrap();
        store.create_store(second, Status::Committed).await.unwrap();

        // Shared pair in both stores, plus one key only in the first.
        for id in [first, second] {
            store
                .autoinsert(b"shared", b"value", id, Status::Committed)
                .await
                .unwrap();
        }
        store
            .autoinsert(b"only-first", b"value", first, Status::Committed)
            .await
            .unwrap();

        store.delete_store_data(first).await.unwrap();

        assert!(!store.store_id_exists(&first).await.unwrap());
        let remaining = store.get_keys_values(second, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, b"shared");
    }
}
