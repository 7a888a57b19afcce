//! Subscription Registry
//!
//! Persists the per-store server lists with their back-off state, plus the
//! validated-generation counter the sync scheduler owns. Server order is
//! insertion order and a URL is never listed twice for a store.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{StoreError, StoreResult};
use super::{nodes, DataStore};
use crate::types::{Bytes32, ServerInfo, Subscription};

impl DataStore {
    /// Merge servers into a store's subscription, appending new URLs at the
    /// end and leaving known ones (and their back-off state) untouched.
    pub async fn subscribe(&self, store_id: Bytes32, urls: Vec<String>) -> StoreResult<Subscription> {
        self.with_writer(move |conn| {
            for url in &urls {
                conn.execute(
                    "INSERT OR IGNORE INTO subscriptions(store_id, url) VALUES(?1, ?2)",
                    params![store_id.as_slice(), url],
                )?;
            }
            get_subscription(conn, &store_id)?
                .ok_or_else(|| StoreError::Internal("subscription vanished during insert".into()))
        })
        .await
    }

    /// Remove a store's subscription entirely.
    pub async fn unsubscribe(&self, store_id: &Bytes32) -> StoreResult<()> {
        let store_id = *store_id;
        self.with_writer(move |conn| {
            conn.execute(
                "DELETE FROM subscriptions WHERE store_id = ?1",
                params![store_id.as_slice()],
            )?;
            Ok(())
        })
        .await
    }

    /// All subscriptions, stores in insertion order.
    pub async fn get_subscriptions(&self) -> StoreResult<Vec<Subscription>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT store_id, url, ignore_till, num_consecutive_failures
                     FROM subscriptions ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut subscriptions: Vec<Subscription> = Vec::new();
            for row in rows {
                let (raw_store, url, ignore_till, failures) = row?;
                let store_id = nodes::blob32(raw_store)?;
                let server = ServerInfo {
                    url,
                    ignore_till: ignore_till as u64,
                    num_consecutive_failures: failures as u64,
                };

                match subscriptions.iter_mut().find(|sub| sub.store_id == store_id) {
                    Some(subscription) => subscription.servers_info.push(server),
                    None => subscriptions.push(Subscription {
                        store_id,
                        servers_info: vec![server],
                    }),
                }
            }
            Ok(subscriptions)
        })
    }

    /// One store's subscription, if present.
    pub async fn get_subscription(&self, store_id: &Bytes32) -> StoreResult<Option<Subscription>> {
        self.read(|conn| get_subscription(conn, store_id))
    }

    /// Servers currently allowed by the back-off schedule, in list order.
    pub async fn get_available_servers_for_store(
        &self,
        store_id: &Bytes32,
        now: u64,
    ) -> StoreResult<Vec<ServerInfo>> {
        Ok(self
            .get_subscription(store_id)
            .await?
            .map(|subscription| subscription.available_servers(now))
            .unwrap_or_default())
    }

    /// Record that a server produced a file that failed verification.
    pub async fn received_incorrect_file(
        &self,
        store_id: &Bytes32,
        server_info: &ServerInfo,
        timestamp: u64,
    ) -> StoreResult<()> {
        let store_id = *store_id;
        let updated = server_info.after_failure(timestamp);
        self.with_writer(move |conn| update_server_info(conn, &store_id, &updated)).await
    }

    /// Record that a server failed to serve a requested file.
    pub async fn server_misses_file(
        &self,
        store_id: &Bytes32,
        server_info: &ServerInfo,
        timestamp: u64,
    ) -> StoreResult<()> {
        let store_id = *store_id;
        let updated = server_info.after_failure(timestamp);
        self.with_writer(move |conn| update_server_info(conn, &store_id, &updated)).await
    }

    /// Record a verified download, clearing the server's failure state.
    pub async fn received_correct_file(
        &self,
        store_id: &Bytes32,
        server_info: &ServerInfo,
    ) -> StoreResult<()> {
        let store_id = *store_id;
        let updated = server_info.after_success();
        self.with_writer(move |conn| update_server_info(conn, &store_id, &updated)).await
    }

    /// Last generation fully validated by the sync scheduler.
    pub async fn get_validated_generation(&self, store_id: &Bytes32) -> StoreResult<u64> {
        self.read(|conn| {
            let generation: Option<i64> = conn
                .query_row(
                    "SELECT generation FROM wallet_generation WHERE store_id = ?1",
                    params![store_id.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(generation.unwrap_or(0) as u64)
        })
    }

    /// Persist the validated generation for a store.
    pub async fn set_validated_generation(
        &self,
        store_id: &Bytes32,
        generation: u64,
    ) -> StoreResult<()> {
        let store_id = *store_id;
        self.with_writer(move |conn| {
            conn.execute(
                "INSERT INTO wallet_generation(store_id, generation) VALUES(?1, ?2)
                     ON CONFLICT(store_id) DO UPDATE SET generation = excluded.generation",
                params![store_id.as_slice(), generation as i64],
            )?;
            Ok(())
        })
        .await
    }
}

fn get_subscription(conn: &Connection, store_id: &Bytes32) -> StoreResult<Option<Subscription>> {
    let mut stmt = conn.prepare(
        "SELECT url, ignore_till, num_consecutive_failures
             FROM subscriptions WHERE store_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![store_id.as_slice()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut servers_info = Vec::new();
    for row in rows {
        let (url, ignore_till, failures) = row?;
        servers_info.push(ServerInfo {
            url,
            ignore_till: ignore_till as u64,
            num_consecutive_failures: failures as u64,
        });
    }

    if servers_info.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Subscription {
            store_id: *store_id,
            servers_info,
        }))
    }
}

fn update_server_info(conn: &Connection, store_id: &Bytes32, server_info: &ServerInfo) -> StoreResult<()> {
    let updated = conn.execute(
        "UPDATE subscriptions SET ignore_till = ?1, num_consecutive_failures = ?2
             WHERE store_id = ?3 AND url = ?4",
        params![
            server_info.ignore_till as i64,
            server_info.num_consecutive_failures as i64,
            store_id.as_slice(),
            server_info.url
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::Internal(format!(
            "no subscription row for store {} url {}",
            hex::encode(store_id),
            server_info.url
        )));
    }
    Ok(())
}
