//! Shared Types Module
//!
//! Data types shared across the store and sync layers.

pub mod node;
pub mod root;
pub mod subscription;

// Re-exports for convenience
pub use node::{Bytes32, InternalNode, Node, NodeType, Side, TerminalNode, EMPTY_ROOT_HASH};
pub use root::{Root, Status};
pub use subscription::{ServerInfo, Subscription};

/// Parse a 32-byte value from a hex string.
pub fn bytes32_from_hex(s: &str) -> Result<Bytes32, hex::FromHexError> {
    let raw = hex::decode(s)?;
    raw.as_slice()
        .try_into()
        .map_err(|_| hex::FromHexError::InvalidStringLength)
}
