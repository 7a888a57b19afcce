//! Synchronization Subsystem
//!
//! Serialization of published tree files, the consumed wallet and file
//! transport interfaces, and the periodic scheduler that downloads and
//! validates advertised generations from mirror servers.

pub mod files;
pub mod service;
pub mod transport;
pub mod wallet;

pub use files::{
    get_delta_filename, get_full_tree_filename, write_files_for_root, FileError, SerializedNode,
};
pub use service::{SyncConfig, SyncError, SyncService};
pub use transport::{FileTransport, HttpTransport, TransportError};
pub use wallet::{HttpWalletClient, SingletonRecord, WalletClient, WalletError};
