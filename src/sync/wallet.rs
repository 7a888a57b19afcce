//! Wallet Interface (consumed)
//!
//! The chain is an opaque ordered log of `(store_id, generation, root)`
//! advertisements owned by an external wallet service. The sync scheduler
//! only needs the latest advertisement and the history above a generation,
//! plus track/untrack notifications when subscriptions change.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{bytes32_from_hex, Bytes32};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("wallet RPC error: {0}")]
    Rpc(String),

    #[error("malformed wallet response: {0}")]
    Malformed(String),
}

/// One on-chain advertisement of a store state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingletonRecord {
    pub generation: u64,
    pub root: Bytes32,
}

/// The wallet operations the sync scheduler consumes.
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Latest advertised `(generation, root)` for a store, if any.
    async fn latest_singleton(&self, store_id: &Bytes32) -> Result<Option<SingletonRecord>, WalletError>;

    /// Advertisements with `generation >= min_generation`, ascending.
    async fn history(
        &self,
        store_id: &Bytes32,
        min_generation: u64,
    ) -> Result<Vec<SingletonRecord>, WalletError>;

    /// Start following a store's advertisements.
    async fn track(&self, store_id: &Bytes32) -> Result<(), WalletError>;

    /// Stop following a store's advertisements.
    async fn stop_tracking(&self, store_id: &Bytes32) -> Result<(), WalletError>;
}

/// Wallet client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWalletClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct StoreRequest {
    store_id: String,
}

#[derive(Serialize)]
struct HistoryRequest {
    store_id: String,
    min_generation: u64,
}

#[derive(Deserialize)]
struct RecordResponse {
    generation: u64,
    root: String,
}

#[derive(Deserialize)]
struct LatestResponse {
    record: Option<RecordResponse>,
}

#[derive(Deserialize)]
struct HistoryResponse {
    records: Vec<RecordResponse>,
}

impl HttpWalletClient {
    /// Create with the wallet RPC base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> Result<Resp, WalletError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(WalletError::Rpc(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

fn record_from_response(record: RecordResponse) -> Result<SingletonRecord, WalletError> {
    Ok(SingletonRecord {
        generation: record.generation,
        root: bytes32_from_hex(&record.root)
            .map_err(|e| WalletError::Malformed(format!("bad root hash: {}", e)))?,
    })
}

#[async_trait]
impl WalletClient for HttpWalletClient {
    async fn latest_singleton(&self, store_id: &Bytes32) -> Result<Option<SingletonRecord>, WalletError> {
        let response: LatestResponse = self
            .post(
                "dl_latest_singleton",
                &StoreRequest {
                    store_id: hex::encode(store_id),
                },
            )
            .await?;
        response.record.map(record_from_response).transpose()
    }

    async fn history(
        &self,
        store_id: &Bytes32,
        min_generation: u64,
    ) -> Result<Vec<SingletonRecord>, WalletError> {
        let response: HistoryResponse = self
            .post(
                "dl_history",
                &HistoryRequest {
                    store_id: hex::encode(store_id),
                    min_generation,
                },
            )
            .await?;
        response
            .records
            .into_iter()
            .map(record_from_response)
            .collect()
    }

    async fn track(&self, store_id: &Bytes32) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .post(
                "dl_track_new",
                &StoreRequest {
                    store_id: hex::encode(store_id),
                },
            )
            .await?;
        Ok(())
    }

    async fn stop_tracking(&self, store_id: &Bytes32) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .post(
                "dl_stop_tracking",
                &StoreRequest {
                    store_id: hex::encode(store_id),
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_parsing() {
        let record = RecordResponse {
            generation: 7,
            root: "ab".repeat(32),
        };
        let parsed = record_from_response(record).unwrap();
        assert_eq!(parsed.generation, 7);
        assert_eq!(parsed.root, [0xab; 32]);

        let bad = RecordResponse {
            generation: 7,
            root: "xyz".to_string(),
        };
        assert!(matches!(
            record_from_response(bad),
            Err(WalletError::Malformed(_))
        ));
    }

    #[test]
    fn test_base_url_normalized() {
        let client = HttpWalletClient::new("http://wallet.example/");
        assert_eq!(client.base_url, "http://wallet.example");
    }
}
