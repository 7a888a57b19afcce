//! REST Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rand::RngCore;
use std::collections::HashMap;

use super::types::*;
use super::SharedAppState;
use crate::store::{OperationType, StoreError};
use crate::sync::SyncError;
use crate::types::{bytes32_from_hex, Bytes32, Status, EMPTY_ROOT_HASH};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_json(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error_response(error: StoreError) -> ApiError {
    let status = match &error {
        StoreError::KeyNotFound { .. }
        | StoreError::UnknownStore { .. }
        | StoreError::NodeNotFound { .. }
        | StoreError::UnknownRoot { .. } => StatusCode::NOT_FOUND,
        StoreError::KeyAlreadyPresent { .. } | StoreError::StoreAlreadyExists { .. } => {
            StatusCode::CONFLICT
        }
        StoreError::NoChange | StoreError::TreeDepthExceeded | StoreError::Internal(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_json(status, error.to_string())
}

fn sync_error_response(error: SyncError) -> ApiError {
    match error {
        SyncError::Store(inner) => store_error_response(inner),
        other => error_json(StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

fn parse_store_id(raw: &str) -> Result<Bytes32, ApiError> {
    bytes32_from_hex(raw)
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, format!("bad store id: {}", e)))
}

/// POST /api/stores
pub async fn handle_create_store(State(state): State<SharedAppState>) -> Result<impl IntoResponse, ApiError> {
    let mut store_id = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut store_id);

    match state.store.create_store(store_id, Status::Committed).await {
        Ok(_) => Ok(Json(CreateStoreResponse {
            store_id: hex::encode(store_id),
        })),
        Err(e) => Err(store_error_response(e)),
    }
}

/// POST /api/stores/:id/update
pub async fn handle_update_store(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;
    let changelist = request
        .changelist
        .into_iter()
        .map(|entry| entry.into_operation())
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_error_response)?;

    match state.service.batch_update(store_id, changelist).await {
        Ok(root_hash) => Ok(Json(UpdateStoreResponse {
            root_hash: hex::encode(root_hash),
        })),
        Err(e) => Err(sync_error_response(e)),
    }
}

/// GET /api/stores/:id/values/:key
pub async fn handle_get_value(
    State(state): State<SharedAppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;
    let key = hex::decode(&key)
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, format!("bad key: {}", e)))?;

    match state.store.get_node_by_key(&key, store_id).await {
        Ok(node) => Ok(Json(GetValueResponse {
            value: Some(hex::encode(node.value)),
        })),
        Err(StoreError::KeyNotFound { .. }) => Ok(Json(GetValueResponse { value: None })),
        Err(e) => Err(store_error_response(e)),
    }
}

/// GET /api/stores/:id/keys-values?root=<hex>
pub async fn handle_get_keys_values(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;
    let root_hash = params
        .get("root")
        .map(|raw| {
            bytes32_from_hex(raw)
                .map_err(|e| error_json(StatusCode::BAD_REQUEST, format!("bad root: {}", e)))
        })
        .transpose()?;

    match state.store.get_keys_values(store_id, root_hash).await {
        Ok(nodes) => Ok(Json(GetKeysValuesResponse {
            keys_values: nodes
                .into_iter()
                .map(|node| KeyValueEntry {
                    key: hex::encode(node.key),
                    value: hex::encode(node.value),
                })
                .collect(),
        })),
        Err(e) => Err(store_error_response(e)),
    }
}

/// GET /api/stores/:id/root
pub async fn handle_get_root(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;

    match state.store.get_tree_root(&store_id, None).await {
        Ok(root) => Ok(Json(GetRootResponse {
            root_hash: hex::encode(root.node_hash.unwrap_or(EMPTY_ROOT_HASH)),
            generation: root.generation,
            confirmed: root.status == Status::Committed,
        })),
        Err(e) => Err(store_error_response(e)),
    }
}

/// GET /api/stores/:id/proof/:key
pub async fn handle_get_proof(
    State(state): State<SharedAppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;
    let key = hex::decode(&key)
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, format!("bad key: {}", e)))?;

    match state.store.proof_of_inclusion_by_key(&key, store_id).await {
        Ok(proof) => Ok(Json(ProofResponse {
            key: hex::encode(&key),
            node_hash: hex::encode(proof.node_hash),
            root_hash: hex::encode(proof.root_hash()),
            program: hex::encode(proof.as_program_bytes()),
            layers: proof
                .layers
                .iter()
                .map(|layer| ProofLayerEntry {
                    other_hash_side: layer.other_hash_side,
                    other_hash: hex::encode(layer.other_hash),
                    combined_hash: hex::encode(layer.combined_hash),
                })
                .collect(),
        })),
        Err(e) => Err(store_error_response(e)),
    }
}

/// POST /api/stores/:id/subscribe
pub async fn handle_subscribe(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;

    match state.service.subscribe(store_id, request.urls).await {
        Ok(subscription) => Ok(Json(SubscriptionEntry {
            store_id: hex::encode(subscription.store_id),
            urls: subscription
                .servers_info
                .into_iter()
                .map(|server| server.url)
                .collect(),
        })),
        Err(e) => Err(sync_error_response(e)),
    }
}

/// POST /api/stores/:id/unsubscribe
pub async fn handle_unsubscribe(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;

    match state.service.unsubscribe(store_id, request.retain_data).await {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(e) => Err(sync_error_response(e)),
    }
}

/// GET /api/subscriptions
pub async fn handle_get_subscriptions(State(state): State<SharedAppState>) -> Result<impl IntoResponse, ApiError> {
    match state.store.get_subscriptions().await {
        Ok(subscriptions) => Ok(Json(SubscriptionsResponse {
            subscriptions: subscriptions
                .into_iter()
                .map(|subscription| SubscriptionEntry {
                    store_id: hex::encode(subscription.store_id),
                    urls: subscription
                        .servers_info
                        .into_iter()
                        .map(|server| server.url)
                        .collect(),
                })
                .collect(),
        })),
        Err(e) => Err(store_error_response(e)),
    }
}

/// POST /api/stores/:id/diff
pub async fn handle_get_kv_diff(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
    Json(request): Json<DiffRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store_id = parse_store_id(&id)?;
    let root_a = bytes32_from_hex(&request.root_a)
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, format!("bad root_a: {}", e)))?;
    let root_b = bytes32_from_hex(&request.root_b)
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, format!("bad root_b: {}", e)))?;

    match state.store.get_kv_diff(store_id, root_a, root_b).await {
        Ok(diff) => {
            let mut entries: Vec<DiffEntry> = diff
                .into_iter()
                .map(|entry| DiffEntry {
                    action: match entry.op {
                        OperationType::Insert => "insert".to_string(),
                        OperationType::Delete => "delete".to_string(),
                    },
                    key: hex::encode(entry.key),
                    value: hex::encode(entry.value),
                })
                .collect();
            entries.sort_by(|a, b| (&a.key, &a.action).cmp(&(&b.key, &b.action)));
            Ok(Json(DiffResponse { diff: entries }))
        }
        Err(e) => Err(store_error_response(e)),
    }
}

/// GET /api/health
pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "canopy",
    }))
}

#[cfg(test)]
mod tests {
    use std::path::Path as FilePath;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::create_router;
    use crate::store::DataStore;
    use crate::sync::transport::{FileTransport, TransportError};
    use crate::sync::wallet::{SingletonRecord, WalletClient, WalletError};
    use crate::sync::{SyncConfig, SyncService};
    use crate::types::Bytes32;

    struct NullWallet;

    #[async_trait]
    impl WalletClient for NullWallet {
        async fn latest_singleton(
            &self,
            _store_id: &Bytes32,
        ) -> Result<Option<SingletonRecord>, WalletError> {
            Ok(None)
        }

        async fn history(
            &self,
            _store_id: &Bytes32,
            _min_generation: u64,
        ) -> Result<Vec<SingletonRecord>, WalletError> {
            Ok(Vec::new())
        }

        async fn track(&self, _store_id: &Bytes32) -> Result<(), WalletError> {
            Ok(())
        }

        async fn stop_tracking(&self, _store_id: &Bytes32) -> Result<(), WalletError> {
            Ok(())
        }
    }

    struct NullTransport;

    #[async_trait]
    impl FileTransport for NullTransport {
        async fn download(
            &self,
            _server_url: &str,
            _filename: &str,
            _dest_path: &FilePath,
            _timeout: Duration,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn upload(
            &self,
            _server_url: &str,
            _local_path: &FilePath,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn test_router(dir: &FilePath) -> axum::Router {
        let store = Arc::new(DataStore::in_memory().unwrap());
        let config = SyncConfig {
            files_dir: dir.join("server_files"),
            download_dir: dir.join("downloads"),
            ..SyncConfig::default()
        };
        let service = Arc::new(SyncService::new(
            store.clone(),
            Arc::new(NullWallet),
            Arc::new(NullTransport),
            config,
        ));
        create_router(store, service)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(dir.path());

        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_update_and_get_value() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(dir.path());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stores")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let store_id = body_json(response).await["store_id"].as_str().unwrap().to_string();

        let update = serde_json::json!({
            "changelist": [{ "action": "insert", "key": "0102", "value": "616263" }],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/stores/{}/update", store_id))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(update.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/stores/{}/values/0102", store_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["value"], "616263");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/stores/{}/root", store_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["generation"], 1);
        assert_eq!(json["confirmed"], true);
    }

    #[tokio::test]
    async fn test_get_value_missing_key_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(dir.path());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stores")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let store_id = body_json(response).await["store_id"].as_str().unwrap().to_string();

        let update = serde_json::json!({
            "changelist": [{ "action": "insert", "key": "00", "value": "11" }],
        });
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/stores/{}/update", store_id))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(update.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/stores/{}/values/ff", store_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["value"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_store_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/stores/{}/root", "00".repeat(32)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_subscribe_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(dir.path());
        let store_id = "ab".repeat(32);

        let request = serde_json::json!({ "urls": ["http://mirror.example"] });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/stores/{}/subscribe", store_id))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/subscriptions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["subscriptions"][0]["store_id"], store_id);
        assert_eq!(json["subscriptions"][0]["urls"][0], "http://mirror.example");
    }
}
