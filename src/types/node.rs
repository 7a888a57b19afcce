//! Merkle Tree Node Types
//!
//! A tree is made of two node kinds: internal nodes referencing two children
//! by hash, and terminal nodes carrying a key/value pair. Nodes are
//! content-addressed: the hash is always recomputable from the fields.

use serde::{Deserialize, Serialize};

/// A 32-byte digest or identifier.
pub type Bytes32 = [u8; 32];

/// Root hash advertised for an empty tree.
pub const EMPTY_ROOT_HASH: Bytes32 = [0u8; 32];

/// Node kind discriminant as stored in the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal = 1,
    Terminal = 2,
}

impl NodeType {
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(NodeType::Internal),
            2 => Some(NodeType::Terminal),
            _ => None,
        }
    }
}

/// Which side of a parent a child (or sibling) sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            _ => Err(format!("unknown side: {}", s)),
        }
    }
}

/// Leaf node holding a key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminalNode {
    pub hash: Bytes32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Binary node referencing two children by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub hash: Bytes32,
    pub left_hash: Bytes32,
    pub right_hash: Bytes32,
}

impl InternalNode {
    /// Hash of the child opposite the given one, if the given hash is a child.
    pub fn other_child_hash(&self, hash: &Bytes32) -> Option<Bytes32> {
        if self.left_hash == *hash {
            Some(self.right_hash)
        } else if self.right_hash == *hash {
            Some(self.left_hash)
        } else {
            None
        }
    }

    /// Side of the child opposite the given one, if the given hash is a child.
    pub fn other_child_side(&self, hash: &Bytes32) -> Option<Side> {
        if self.left_hash == *hash {
            Some(Side::Right)
        } else if self.right_hash == *hash {
            Some(Side::Left)
        } else {
            None
        }
    }
}

/// Tagged node union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal(InternalNode),
    Terminal(TerminalNode),
}

impl Node {
    pub fn hash(&self) -> Bytes32 {
        match self {
            Node::Internal(node) => node.hash,
            Node::Terminal(node) => node.hash,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Internal(_) => NodeType::Internal,
            Node::Terminal(_) => NodeType::Terminal,
        }
    }
}
