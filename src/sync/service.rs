//! Sync Scheduler
//!
//! Long-running service that keeps subscribed stores in step with their
//! on-chain advertisements: every cycle it asks the wallet for the latest
//! `(generation, root)` per subscription, downloads the missing delta files
//! from the first mirror that can serve all of them, validates them against
//! the advertised roots, and persists the validated generation. Any
//! verification failure rolls the store back to the last validated
//! generation and reports the server for back-off; the loop itself never
//! terminates on errors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::files::{self, FileError};
use super::transport::{FileTransport, TransportError};
use super::wallet::{SingletonRecord, WalletClient, WalletError};
use crate::store::{BatchOperation, DataStore, StoreError};
use crate::types::{Bytes32, ServerInfo, Status, Subscription, EMPTY_ROOT_HASH};

/// Sync scheduler errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("server unavailable: {url}: {reason}")]
    ServerUnavailable { url: String, reason: String },

    #[error("server returned wrong file: {url}: {reason}")]
    ServerReturnedWrongFile { url: String, reason: String },

    #[error("unexpected generation in root history: expected {expected}, got {got}")]
    UnexpectedGeneration { expected: u64, got: u64 },
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Seconds between fetch cycles.
    pub fetch_data_interval_secs: u64,
    /// Total deadline for a single file download.
    pub download_timeout_secs: u64,
    /// Where published files are written.
    pub files_dir: PathBuf,
    /// Where downloaded files land before validation.
    pub download_dir: PathBuf,
    /// Place files under a per-store directory.
    pub group_files_by_store: bool,
    /// Servers published files are uploaded to.
    pub upload_servers: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_data_interval_secs: 60,
            download_timeout_secs: 30,
            files_dir: PathBuf::from("server_files"),
            download_dir: PathBuf::from("downloads"),
            group_files_by_store: false,
            upload_servers: Vec::new(),
        }
    }
}

/// The periodic fetch/validate service.
pub struct SyncService {
    store: Arc<DataStore>,
    wallet: Arc<dyn WalletClient>,
    transport: Arc<dyn FileTransport>,
    config: SyncConfig,
    /// Guards subscription registry mutation and enumeration.
    subscription_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl SyncService {
    pub fn new(
        store: Arc<DataStore>,
        wallet: Arc<dyn WalletClient>,
        transport: Arc<dyn FileTransport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            wallet,
            transport,
            config,
            subscription_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Ask the run loop to stop after the current cycle.
    pub fn request_shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    /// Run the periodic fetch loop (blocking).
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.fetch_data_interval_secs,
            "starting sync scheduler"
        );

        let mut fetch_interval = interval(Duration::from_secs(self.config.fetch_data_interval_secs));
        while !self.shut_down.load(Ordering::SeqCst) {
            fetch_interval.tick().await;
            if let Err(e) = self.process_cycle().await {
                error!("fetch cycle error: {}", e);
            }
        }

        info!("sync scheduler stopped");
    }

    /// Run a single fetch cycle over all subscriptions.
    ///
    /// Stores sync concurrently; within one cycle each store has exactly
    /// one task, and cycles never overlap.
    pub async fn process_cycle(&self) -> Result<(), SyncError> {
        let subscriptions = {
            let _guard = self.subscription_lock.lock().await;
            self.store.get_subscriptions().await?
        };

        let results = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.fetch_and_validate(subscription)),
        )
        .await;

        for (subscription, result) in subscriptions.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    store_id = %hex::encode(subscription.store_id),
                    "sync failed, will retry next cycle: {}", e
                );
            }
        }

        Ok(())
    }

    /// Bring one subscribed store up to its advertised generation.
    pub async fn fetch_and_validate(&self, subscription: &Subscription) -> Result<(), SyncError> {
        let store_id = subscription.store_id;

        let singleton = match self.wallet.latest_singleton(&store_id).await? {
            None => {
                info!(store_id = %hex::encode(store_id), "no singleton record, skipping");
                return Ok(());
            }
            Some(singleton) => singleton,
        };
        if singleton.generation == 0 {
            info!(store_id = %hex::encode(store_id), "no data on chain, skipping");
            return Ok(());
        }

        if !self.store.store_id_exists(&store_id).await? {
            self.store.create_store(store_id, Status::Committed).await?;
        }

        let validated_generation = self.store.get_validated_generation(&store_id).await?;
        if validated_generation >= singleton.generation {
            debug!(
                store_id = %hex::encode(store_id),
                generation = validated_generation,
                "validated generation matches on-chain generation"
            );
            return Ok(());
        }

        let to_check: Vec<SingletonRecord> = self
            .wallet
            .history(&store_id, validated_generation + 1)
            .await?
            .into_iter()
            .filter(|record| record.generation <= singleton.generation)
            .collect();
        for (offset, record) in to_check.iter().enumerate() {
            let expected = validated_generation + 1 + offset as u64;
            if record.generation != expected {
                return Err(SyncError::UnexpectedGeneration {
                    expected,
                    got: record.generation,
                });
            }
        }
        if to_check.is_empty() {
            return Ok(());
        }

        info!(
            store_id = %hex::encode(store_id),
            from = validated_generation,
            to = singleton.generation,
            "downloading delta files"
        );

        let servers = self
            .store
            .get_available_servers_for_store(&store_id, unix_timestamp())
            .await?;
        if servers.is_empty() {
            debug!(store_id = %hex::encode(store_id), "no servers available");
            return Ok(());
        }

        let mut winning_server: Option<ServerInfo> = None;
        for server in &servers {
            match self.download_delta_files(&store_id, &to_check, server).await {
                Ok(()) => {
                    winning_server = Some(server.clone());
                    break;
                }
                Err(e) => {
                    let e = SyncError::ServerUnavailable {
                        url: server.url.clone(),
                        reason: e.to_string(),
                    };
                    warn!("download failed: {}", e);
                    self.store
                        .server_misses_file(&store_id, server, unix_timestamp())
                        .await?;
                }
            }
        }
        let server = match winning_server {
            None => {
                error!(store_id = %hex::encode(store_id), "no server returned all files");
                return Ok(());
            }
            Some(server) => server,
        };

        match self.apply_delta_files(&store_id, &to_check).await {
            Ok(()) => {
                self.store.received_correct_file(&store_id, &server).await?;
                self.store
                    .set_validated_generation(&store_id, singleton.generation)
                    .await?;
                info!(
                    store_id = %hex::encode(store_id),
                    generation = singleton.generation,
                    root = %hex::encode(singleton.root),
                    "finished downloading and validating"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    store_id = %hex::encode(store_id),
                    "validation failed, rolling back to generation {}: {}",
                    validated_generation, e
                );
                self.store
                    .received_incorrect_file(&store_id, &server, unix_timestamp())
                    .await?;
                self.store
                    .rollback_to_generation(&store_id, validated_generation)
                    .await?;
                self.discard_downloads(&store_id, &to_check).await;
                Err(SyncError::ServerReturnedWrongFile {
                    url: server.url,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Download every missing delta file for the pending records from one
    /// server. Any failure makes the whole attempt fail.
    async fn download_delta_files(
        &self,
        store_id: &Bytes32,
        records: &[SingletonRecord],
        server: &ServerInfo,
    ) -> Result<(), SyncError> {
        let dir = files::store_files_dir(
            &self.config.download_dir,
            store_id,
            self.config.group_files_by_store,
        );
        let timeout = Duration::from_secs(self.config.download_timeout_secs);

        for record in records {
            let filename = files::get_delta_filename(store_id, &record.root, record.generation);
            let dest = dir.join(&filename);
            if dest.exists() {
                continue;
            }
            self.transport
                .download(&server.url, &filename, &dest, timeout)
                .await?;
        }
        Ok(())
    }

    /// Parse and commit the downloaded files in generation order.
    async fn apply_delta_files(
        &self,
        store_id: &Bytes32,
        records: &[SingletonRecord],
    ) -> Result<(), SyncError> {
        let dir = files::store_files_dir(
            &self.config.download_dir,
            store_id,
            self.config.group_files_by_store,
        );

        for record in records {
            let current = self.store.get_tree_generation(store_id).await?;
            if record.generation != current + 1 {
                return Err(SyncError::UnexpectedGeneration {
                    expected: current + 1,
                    got: record.generation,
                });
            }

            let filename = files::get_delta_filename(store_id, &record.root, record.generation);
            files::insert_from_delta_file(&self.store, *store_id, record.root, &dir.join(&filename))
                .await?;
        }
        Ok(())
    }

    /// Remove downloads that failed validation so the next attempt
    /// re-fetches them, possibly from another server.
    async fn discard_downloads(&self, store_id: &Bytes32, records: &[SingletonRecord]) {
        let dir = files::store_files_dir(
            &self.config.download_dir,
            store_id,
            self.config.group_files_by_store,
        );
        for record in records {
            let filename = files::get_delta_filename(store_id, &record.root, record.generation);
            let _ = tokio::fs::remove_file(dir.join(&filename)).await;
        }
    }

    /// Subscribe to a store, merging mirror URLs, and start wallet tracking.
    pub async fn subscribe(
        &self,
        store_id: Bytes32,
        urls: Vec<String>,
    ) -> Result<Subscription, SyncError> {
        self.wallet.track(&store_id).await?;
        let _guard = self.subscription_lock.lock().await;
        let subscription = self.store.subscribe(store_id, urls).await?;
        info!(store_id = %hex::encode(store_id), "subscribed");
        Ok(subscription)
    }

    /// Drop a store's subscription; optionally keep its local data.
    pub async fn unsubscribe(&self, store_id: Bytes32, retain_data: bool) -> Result<(), SyncError> {
        {
            let _guard = self.subscription_lock.lock().await;
            self.store.unsubscribe(&store_id).await?;
        }
        self.wallet.stop_tracking(&store_id).await?;
        if !retain_data {
            self.store.delete_store_data(store_id).await?;
        }
        info!(store_id = %hex::encode(store_id), "unsubscribed");
        Ok(())
    }

    /// Apply a changelist, publish the generation's files, and upload them
    /// to the configured servers. Returns the new root hash (zeros for an
    /// emptied tree).
    pub async fn batch_update(
        &self,
        store_id: Bytes32,
        changelist: Vec<BatchOperation>,
    ) -> Result<Bytes32, SyncError> {
        let node_hash = self
            .store
            .insert_batch(store_id, changelist, Status::Committed)
            .await?;
        let root = self.store.get_tree_root(&store_id, None).await?;

        let written = files::write_files_for_root(
            &self.store,
            store_id,
            &root,
            &self.config.files_dir,
            self.config.group_files_by_store,
        )
        .await?;

        for server in &self.config.upload_servers {
            for path in [&written.full_path, &written.delta_path] {
                if let Err(e) = self.transport.upload(server, path).await {
                    warn!(server = %server, file = %path.display(), "upload failed: {}", e);
                }
            }
        }

        Ok(node_hash.unwrap_or(EMPTY_ROOT_HASH))
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    mockall::mock! {
        pub Wallet {}

        #[async_trait::async_trait]
        impl WalletClient for Wallet {
            async fn latest_singleton(
                &self,
                store_id: &Bytes32,
            ) -> Result<Option<SingletonRecord>, WalletError>;
            async fn history(
                &self,
                store_id: &Bytes32,
                min_generation: u64,
            ) -> Result<Vec<SingletonRecord>, WalletError>;
            async fn track(&self, store_id: &Bytes32) -> Result<(), WalletError>;
            async fn stop_tracking(&self, store_id: &Bytes32) -> Result<(), WalletError>;
        }
    }

    /// Transport that serves files from a local directory.
    struct DirTransport {
        source: PathBuf,
    }

    #[async_trait::async_trait]
    impl FileTransport for DirTransport {
        async fn download(
            &self,
            _server_url: &str,
            filename: &str,
            dest_path: &Path,
            _timeout: Duration,
        ) -> Result<(), TransportError> {
            let source = self.source.join(filename);
            if !source.exists() {
                return Err(TransportError::Status {
                    url: filename.to_string(),
                    status: 404,
                });
            }
            if let Some(parent) = dest_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, dest_path).await?;
            Ok(())
        }

        async fn upload(&self, _server_url: &str, _local_path: &Path) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn store_id(byte: u8) -> Bytes32 {
        [byte; 32]
    }

    fn service_with(
        wallet: MockWallet,
        source_dir: PathBuf,
        work_dir: &Path,
    ) -> SyncService {
        let store = Arc::new(DataStore::in_memory().unwrap());
        let config = SyncConfig {
            fetch_data_interval_secs: 1,
            files_dir: work_dir.join("server_files"),
            download_dir: work_dir.join("downloads"),
            ..SyncConfig::default()
        };
        SyncService::new(
            store,
            Arc::new(wallet),
            Arc::new(DirTransport { source: source_dir }),
            config,
        )
    }

    #[tokio::test]
    async fn test_skips_store_without_singleton() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = MockWallet::new();
        wallet.expect_track().returning(|_| Ok(()));
        wallet.expect_latest_singleton().returning(|_| Ok(None));

        let service = service_with(wallet, dir.path().to_path_buf(), dir.path());
        service
            .subscribe(store_id(1), vec!["http://mirror.example".into()])
            .await
            .unwrap();

        service.process_cycle().await.unwrap();
        assert_eq!(
            service.store().get_validated_generation(&store_id(1)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_missing_files_trigger_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = MockWallet::new();
        wallet.expect_track().returning(|_| Ok(()));
        wallet.expect_latest_singleton().returning(|_| {
            Ok(Some(SingletonRecord {
                generation: 1,
                root: [0x42; 32],
            }))
        });
        wallet.expect_history().returning(|_, _| {
            Ok(vec![SingletonRecord {
                generation: 1,
                root: [0x42; 32],
            }])
        });

        // Source directory is empty, so every download misses.
        let service = service_with(wallet, dir.path().join("empty"), dir.path());
        service
            .subscribe(store_id(1), vec!["http://mirror.example".into()])
            .await
            .unwrap();

        service.process_cycle().await.unwrap();

        let subscription = service
            .store()
            .get_subscription(&store_id(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(subscription.servers_info[0].num_consecutive_failures, 1);
        assert!(subscription.servers_info[0].ignore_till >= unix_timestamp() + 200);
        assert_eq!(
            service.store().get_validated_generation(&store_id(1)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_tracking_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = MockWallet::new();
        wallet.expect_track().times(1).returning(|_| Ok(()));
        wallet.expect_stop_tracking().times(1).returning(|_| Ok(()));

        let service = service_with(wallet, dir.path().to_path_buf(), dir.path());
        service
            .subscribe(store_id(1), vec!["http://mirror.example".into()])
            .await
            .unwrap();
        service.unsubscribe(store_id(1), false).await.unwrap();

        assert!(service
            .store()
            .get_subscription(&store_id(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_update_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = MockWallet::new();
        wallet.expect_track().returning(|_| Ok(()));

        let service = service_with(wallet, dir.path().to_path_buf(), dir.path());
        let id = store_id(1);
        service.store().create_store(id, Status::Committed).await.unwrap();

        let root_hash = service
            .batch_update(
                id,
                vec![BatchOperation::Insert {
                    key: b"key".to_vec(),
                    value: b"value".to_vec(),
                    reference_node_hash: None,
                    side: None,
                }],
            )
            .await
            .unwrap();
        assert_ne!(root_hash, EMPTY_ROOT_HASH);

        let full = dir
            .path()
            .join("server_files")
            .join(files::get_full_tree_filename(&id, &root_hash, 1));
        let delta = dir
            .path()
            .join("server_files")
            .join(files::get_delta_filename(&id, &root_hash, 1));
        assert!(full.exists());
        assert!(delta.exists());
    }
}
