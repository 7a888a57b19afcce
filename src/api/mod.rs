//! RPC Surface
//!
//! REST endpoints over the store and sync service, exposed for external
//! front-ends and for testability:
//! - POST /api/stores - Create a store
//! - POST /api/stores/:id/update - Apply a changelist, publish files
//! - GET  /api/stores/:id/values/:key - Look up one value
//! - GET  /api/stores/:id/keys-values - List key/value pairs
//! - GET  /api/stores/:id/root - Current root and generation
//! - POST /api/stores/:id/subscribe / unsubscribe - Mirror management
//! - GET  /api/subscriptions - All subscriptions
//! - POST /api/stores/:id/diff - Key/value diff between two roots

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::store::DataStore;
use crate::sync::SyncService;

/// Combined application state for all API endpoints
pub struct AppState {
    pub store: Arc<DataStore>,
    pub service: Arc<SyncService>,
}

/// Shared application state type
pub type SharedAppState = Arc<AppState>;

/// Create the API router
pub fn create_router(store: Arc<DataStore>, service: Arc<SyncService>) -> Router {
    let state = Arc::new(AppState { store, service });

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stores", post(handlers::handle_create_store))
        .route("/api/stores/:id/update", post(handlers::handle_update_store))
        .route("/api/stores/:id/values/:key", get(handlers::handle_get_value))
        .route("/api/stores/:id/keys-values", get(handlers::handle_get_keys_values))
        .route("/api/stores/:id/root", get(handlers::handle_get_root))
        .route("/api/stores/:id/proof/:key", get(handlers::handle_get_proof))
        .route("/api/stores/:id/subscribe", post(handlers::handle_subscribe))
        .route("/api/stores/:id/unsubscribe", post(handlers::handle_unsubscribe))
        .route("/api/stores/:id/diff", post(handlers::handle_get_kv_diff))
        .route("/api/subscriptions", get(handlers::handle_get_subscriptions))
        .route("/api/health", get(handlers::handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the given port.
pub async fn start_server(
    store: Arc<DataStore>,
    service: Arc<SyncService>,
    port: u16,
) -> Result<(), std::io::Error> {
    let app = create_router(store, service);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "API server listening");
    axum::serve(listener, app).await
}
