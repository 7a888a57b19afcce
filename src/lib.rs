//! canopy - Authenticated Key-Value Store with Verifiable Sync
//!
//! A persistent, versioned Merkle tree per 32-byte store id, plus the
//! synchronization subsystem that lets mutually-untrusting peers fetch and
//! validate trees from HTTP mirrors by verifiable incremental deltas.
//!
//! ## Components
//!
//! 1. **Store** - SQLite-backed node table, root registry, ancestor index,
//!    tree engine and subscription registry
//! 2. **Merkle** - The tree-hash scheme and proofs of inclusion
//! 3. **Sync** - Tree file codec, wallet/transport interfaces and the
//!    periodic fetch/validate scheduler
//! 4. **API** - REST surface for front-ends and tests

pub mod api;
pub mod common;
pub mod config;
pub mod logging;
pub mod merkle;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports: store
pub use store::{BatchOperation, DataStore, DiffData, IntegrityKind, OperationType, StoreError};

// Re-exports: merkle
pub use merkle::{internal_hash, leaf_hash, ProofOfInclusion, ProofOfInclusionLayer};

// Re-exports: sync
pub use sync::{
    get_delta_filename, get_full_tree_filename, write_files_for_root, FileTransport, HttpTransport,
    HttpWalletClient, SingletonRecord, SyncConfig, SyncError, SyncService, WalletClient,
};

// Re-exports: shared types
pub use types::{
    Bytes32, InternalNode, Node, NodeType, Root, ServerInfo, Side, Status, Subscription,
    TerminalNode, EMPTY_ROOT_HASH,
};

// Re-exports: top-level error
pub use common::{CanopyError, Result};
