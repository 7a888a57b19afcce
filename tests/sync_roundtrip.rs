//! End-to-end sync scenarios: a source store publishes delta files per
//! generation, a mirror store downloads and validates them against the
//! advertised root history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use canopy::store::DataStore;
use canopy::sync::transport::{FileTransport, TransportError};
use canopy::sync::wallet::{SingletonRecord, WalletClient, WalletError};
use canopy::sync::{write_files_for_root, SyncConfig, SyncService};
use canopy::types::{Bytes32, Status};
use canopy::BatchOperation;

/// Wallet stub advertising a fixed root history.
struct ScriptedWallet {
    records: Vec<SingletonRecord>,
}

#[async_trait]
impl WalletClient for ScriptedWallet {
    async fn latest_singleton(&self, _store_id: &Bytes32) -> Result<Option<SingletonRecord>, WalletError> {
        Ok(self.records.last().copied())
    }

    async fn history(
        &self,
        _store_id: &Bytes32,
        min_generation: u64,
    ) -> Result<Vec<SingletonRecord>, WalletError> {
        Ok(self
            .records
            .iter()
            .copied()
            .filter(|record| record.generation >= min_generation)
            .collect())
    }

    async fn track(&self, _store_id: &Bytes32) -> Result<(), WalletError> {
        Ok(())
    }

    async fn stop_tracking(&self, _store_id: &Bytes32) -> Result<(), WalletError> {
        Ok(())
    }
}

/// Transport stub serving files from a local directory.
struct DirTransport {
    source: PathBuf,
}

#[async_trait]
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

const STORE_ID: Bytes32 = [0x5a; 32];

/// Build a source store with five committed generations and publish the
/// delta files into `server_dir`. Returns the advertised history.
async fn publish_source(server_dir: &Path) -> (DataStore, Vec<SingletonRecord>) {
    let source = DataStore::in_memory().unwrap();
    source.create_store(STORE_ID, Status::Committed).await.unwrap();

    let mut records = Vec::new();
    for round in 0u8..5 {
        let changelist: Vec<BatchOperation> = (0u8..20)
            .map(|index| BatchOperation::Insert {
                key: vec![round, index],
                value: vec![index, round, index],
                reference_node_hash: None,
                side: None,
            })
            .collect();
        source.insert_batch(STORE_ID, changelist, Status::Committed).await.unwrap();

        let root = source.get_tree_root(&STORE_ID, None).await.unwrap();
        write_files_for_root(&source, STORE_ID, &root, server_dir, false)
            .await
            .unwrap();
        records.push(SingletonRecord {
            generation: root.generation,
            root: root.node_hash.unwrap(),
        });
    }

    (source, records)
}

fn mirror_service(records: Vec<SingletonRecord>, server_dir: &Path, work_dir: &Path) -> SyncService {
    let store = Arc::new(DataStore::in_memory().unwrap());
    let config = SyncConfig {
        fetch_data_interval_secs: 1,
        files_dir: work_dir.join("server_files"),
        download_dir: work_dir.join("downloads"),
        ..SyncConfig::default()
    };
    SyncService::new(
        store,
        Arc::new(ScriptedWallet { records }),
        Arc::new(DirTransport {
            source: server_dir.to_path_buf(),
        }),
        config,
    )
}

#[tokio::test]
async fn test_delta_sync_reproduces_source() {
    let dir = tempfile::tempdir().unwrap();
    let server_dir = dir.path().join("server");
    tokio::fs::create_dir_all(&server_dir).await.unwrap();

    let (source, records) = publish_source(&server_dir).await;
    let service = mirror_service(records.clone(), &server_dir, dir.path());
    service
        .subscribe(STORE_ID, vec!["http://mirror.example".into()])
        .await
        .unwrap();

    service.process_cycle().await.unwrap();

    let mirror = service.store();
    assert_eq!(mirror.get_validated_generation(&STORE_ID).await.unwrap(), 5);

    let mirror_root = mirror.get_tree_root(&STORE_ID, None).await.unwrap();
    let source_root = source.get_tree_root(&STORE_ID, None).await.unwrap();
    assert_eq!(mirror_root.generation, 5);
    assert_eq!(mirror_root.node_hash, source_root.node_hash);

    assert_eq!(
        mirror.get_keys_values_dict(STORE_ID).await.unwrap(),
        source.get_keys_values_dict(STORE_ID).await.unwrap()
    );
    mirror.check().await.unwrap();
}

#[tokio::test]
async fn test_corrupted_delta_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let server_dir = dir.path().join("server");
    tokio::fs::create_dir_all(&server_dir).await.unwrap();

    let (_source, records) = publish_source(&server_dir).await;

    // Flip one byte inside the generation-2 delta payload.
    let delta_2 = canopy::get_delta_filename(&STORE_ID, &records[1].root, 2);
    let path = server_dir.join(&delta_2);
    let mut bytes = tokio::fs::read(&path).await.unwrap();
    let target = bytes.len() / 2;
    bytes[target] ^= 0x01;
    tokio::fs::write(&path, bytes).await.unwrap();

    let service = mirror_service(records.clone(), &server_dir, dir.path());
    service
        .subscribe(STORE_ID, vec!["http://mirror.example".into()])
        .await
        .unwrap();

    service.process_cycle().await.unwrap();

    // The mirror rolled back to generation zero and nothing was validated.
    let mirror = service.store();
    assert_eq!(mirror.get_validated_generation(&STORE_ID).await.unwrap(), 0);
    assert_eq!(mirror.get_tree_generation(&STORE_ID).await.unwrap(), 0);
    assert!(mirror.get_keys_values(STORE_ID, None).await.unwrap().is_empty());
    mirror.check().await.unwrap();

    // The serving mirror got put on hold for the failure.
    let subscription = mirror.get_subscription(&STORE_ID).await.unwrap().unwrap();
    assert_eq!(subscription.servers_info[0].num_consecutive_failures, 1);
    assert!(subscription.servers_info[0].ignore_till > 0);
}

#[tokio::test]
async fn test_sync_resumes_after_interruption() {
    let dir = tempfile::tempdir().unwrap();
    let server_dir = dir.path().join("server");
    tokio::fs::create_dir_all(&server_dir).await.unwrap();

    let (source, records) = publish_source(&server_dir).await;

    // First expose only generations one and two, then the full history.
    let service = mirror_service(records[..2].to_vec(), &server_dir, dir.path());
    service
        .subscribe(STORE_ID, vec!["http://mirror.example".into()])
        .await
        .unwrap();
    service.process_cycle().await.unwrap();
    assert_eq!(
        service.store().get_validated_generation(&STORE_ID).await.unwrap(),
        2
    );

    let resumed = SyncService::new(
        service.store().clone(),
        Arc::new(ScriptedWallet { records }),
        Arc::new(DirTransport {
            source: server_dir.clone(),
        }),
        SyncConfig {
            fetch_data_interval_secs: 1,
            files_dir: dir.path().join("server_files"),
            download_dir: dir.path().join("downloads"),
            ..SyncConfig::default()
        },
    );
    resumed.process_cycle().await.unwrap();

    let mirror = resumed.store();
    assert_eq!(mirror.get_validated_generation(&STORE_ID).await.unwrap(), 5);
    assert_eq!(
        mirror.get_keys_values_dict(STORE_ID).await.unwrap(),
        source.get_keys_values_dict(STORE_ID).await.unwrap()
    );
}
