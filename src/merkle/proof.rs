//! Proof of Inclusion
//!
//! A proof lists the sibling hash on every level from a leaf up to the
//! root. Recomputing the chain of internal hashes from the leaf must end at
//! the registered root, otherwise the proof is rejected. The serialized
//! form is a two-element program `[sides_integer, [sibling_hash, ...]]`
//! where bit `i` of the integer is set when layer `i`'s sibling sits on the
//! left. The byte encoding is stable and shared with on-chain consumers.

use serde::{Deserialize, Serialize};

use crate::merkle::hash::calculate_internal_hash;
use crate::types::{Bytes32, InternalNode, Side};

/// One level of a proof: the sibling and the resulting parent hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfInclusionLayer {
    pub other_hash_side: Side,
    pub other_hash: Bytes32,
    pub combined_hash: Bytes32,
}

impl ProofOfInclusionLayer {
    /// Build a layer from the parent node and the child being traversed.
    ///
    /// Returns `None` when the child is not referenced by the parent.
    pub fn from_internal_node(internal_node: &InternalNode, traversal_child_hash: &Bytes32) -> Option<Self> {
        Some(Self {
            other_hash_side: internal_node.other_child_side(traversal_child_hash)?,
            other_hash: internal_node.other_child_hash(traversal_child_hash)?,
            combined_hash: internal_node.hash,
        })
    }

    /// Build a layer by combining a hash with its sibling.
    pub fn from_hashes(primary_hash: &Bytes32, other_hash_side: Side, other_hash: Bytes32) -> Self {
        Self {
            other_hash_side,
            other_hash,
            combined_hash: calculate_internal_hash(primary_hash, other_hash_side, &other_hash),
        }
    }
}

/// Proof that a node is part of a tree, layers ordered leaf to root.
///
/// A root-only tree proves itself with an empty layer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfInclusion {
    pub node_hash: Bytes32,
    pub layers: Vec<ProofOfInclusionLayer>,
}

impl ProofOfInclusion {
    /// The root hash this proof leads to.
    pub fn root_hash(&self) -> Bytes32 {
        match self.layers.last() {
            Some(layer) => layer.combined_hash,
            None => self.node_hash,
        }
    }

    /// Bit `i` is set when layer `i`'s sibling is on the left.
    pub fn sibling_sides_integer(&self) -> u64 {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| match layer.other_hash_side {
                Side::Left => 1u64 << index,
                Side::Right => 0,
            })
            .sum()
    }

    /// Sibling hashes in layer order.
    pub fn sibling_hashes(&self) -> Vec<Bytes32> {
        self.layers.iter().map(|layer| layer.other_hash).collect()
    }

    /// Recompute the chain from the leaf and check every combined hash.
    pub fn valid(&self) -> bool {
        let mut existing_hash = self.node_hash;

        for layer in &self.layers {
            let calculated_hash =
                calculate_internal_hash(&existing_hash, layer.other_hash_side, &layer.other_hash);

            if calculated_hash != layer.combined_hash {
                return false;
            }

            existing_hash = calculated_hash;
        }

        existing_hash == self.root_hash()
    }

    /// Stable byte serialization of `[sides_integer, [sibling_hash, ...]]`.
    pub fn as_program_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        // Outer pair: sides integer, then the hash list, then nil.
        out.push(0xff);
        out.extend(encode_atom(&int_to_atom(self.sibling_sides_integer())));
        out.push(0xff);
        for hash in self.sibling_hashes() {
            out.push(0xff);
            out.extend(encode_atom(&hash));
        }
        out.push(0x80);
        out.push(0x80);

        out
    }
}

/// Minimal big-endian atom for a non-negative integer.
///
/// Zero is the empty atom; a leading zero byte is kept when the top bit of
/// the first value byte is set, so the atom always reads back non-negative.
fn int_to_atom(value: u64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(7);
    let mut atom = bytes[start..].to_vec();
    if atom[0] & 0x80 != 0 {
        atom.insert(0, 0x00);
    }
    atom
}

/// Serialize an atom: empty is 0x80, a single byte below 0x80 is itself,
/// anything else up to 63 bytes gets a one-byte length prefix.
fn encode_atom(atom: &[u8]) -> Vec<u8> {
    if atom.is_empty() {
        return vec![0x80];
    }
    if atom.len() == 1 && atom[0] < 0x80 {
        return vec![atom[0]];
    }

    debug_assert!(atom.len() <= 0x3f);
    let mut out = Vec::with_capacity(atom.len() + 1);
    out.push(0x80 | atom.len() as u8);
    out.extend_from_slice(atom);
    out
}
