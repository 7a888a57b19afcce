//! API Request/Response Types
//!
//! JSON payloads with hex-encoded binary fields. Changelist entries use the
//! external `{action, key, value?, reference_node_hash?, side?}` shape.

use serde::{Deserialize, Serialize};

use crate::store::{BatchOperation, StoreError};
use crate::types::{bytes32_from_hex, Side};

/// One changelist entry as submitted over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub action: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_node_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

impl ChangeEntry {
    /// Decode into a store batch operation.
    pub fn into_operation(self) -> Result<BatchOperation, StoreError> {
        let key = decode_hex(&self.key, "key")?;
        match self.action.as_str() {
            "insert" => Ok(BatchOperation::Insert {
                key,
                value: decode_hex(
                    self.value
                        .as_deref()
                        .ok_or_else(|| StoreError::Internal("insert requires a value".into()))?,
                    "value",
                )?,
                reference_node_hash: self
                    .reference_node_hash
                    .as_deref()
                    .map(|raw| {
                        bytes32_from_hex(raw).map_err(|e| {
                            StoreError::Internal(format!("bad reference_node_hash: {}", e))
                        })
                    })
                    .transpose()?,
                side: self.side,
            }),
            "delete" => Ok(BatchOperation::Delete { key }),
            "upsert" => Ok(BatchOperation::Upsert {
                key,
                value: decode_hex(
                    self.value
                        .as_deref()
                        .ok_or_else(|| StoreError::Internal("upsert requires a value".into()))?,
                    "value",
                )?,
            }),
            other => Err(StoreError::Internal(format!("unknown action: {}", other))),
        }
    }
}

fn decode_hex(raw: &str, field: &str) -> Result<Vec<u8>, StoreError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| StoreError::Internal(format!("bad hex in {}: {}", field, e)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStoreRequest {
    pub changelist: Vec<ChangeEntry>,
}

#[derive(Debug, Serialize)]
pub struct CreateStoreResponse {
    pub store_id: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateStoreResponse {
    pub root_hash: String,
}

#[derive(Debug, Serialize)]
pub struct GetValueResponse {
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct GetKeysValuesResponse {
    pub keys_values: Vec<KeyValueEntry>,
}

#[derive(Debug, Serialize)]
pub struct GetRootResponse {
    pub root_hash: String,
    pub generation: u64,
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct ProofResponse {
    pub key: String,
    pub node_hash: String,
    pub root_hash: String,
    pub program: String,
    pub layers: Vec<ProofLayerEntry>,
}

#[derive(Debug, Serialize)]
pub struct ProofLayerEntry {
    pub other_hash_side: Side,
    pub other_hash: String,
    pub combined_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    #[serde(default)]
    pub retain_data: bool,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEntry {
    pub store_id: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DiffRequest {
    pub root_a: String,
    pub root_b: String,
}

#[derive(Debug, Serialize)]
pub struct DiffEntry {
    pub action: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct DiffResponse {
    pub diff: Vec<DiffEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
