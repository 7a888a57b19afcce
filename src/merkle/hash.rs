//! Tree-Hash Scheme
//!
//! Domain-separated sha256 hashing: atoms hash under a 0x01 prefix, pairs
//! under a 0x02 prefix. An internal node hashes its two child hashes as a
//! pair; a leaf hashes the pair of its key atom and value atom. Published
//! roots use the same scheme, so any file or proof can be checked against
//! an advertised root by recomputation alone.

use sha2::{Digest, Sha256};

use crate::types::{Bytes32, Side};

/// Hash an atom: sha256(0x01 || bytes).
pub fn atom_hash(atom: &[u8]) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(atom);
    hasher.finalize().into()
}

/// Hash an internal node: sha256(0x02 || left || right).
pub fn internal_hash(left_hash: &Bytes32, right_hash: &Bytes32) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update([0x02]);
    hasher.update(left_hash);
    hasher.update(right_hash);
    hasher.finalize().into()
}

/// Hash a terminal node from its key and value.
pub fn leaf_hash(key: &[u8], value: &[u8]) -> Bytes32 {
    internal_hash(&atom_hash(key), &atom_hash(value))
}

/// Combine a hash with a sibling on the given side.
pub fn calculate_internal_hash(hash: &Bytes32, other_hash_side: Side, other_hash: &Bytes32) -> Bytes32 {
    match other_hash_side {
        Side::Left => internal_hash(other_hash, hash),
        Side::Right => internal_hash(hash, other_hash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_hash_is_pair_of_atoms() {
        let key = b"\x01\x02";
        let value = b"abc";
        assert_eq!(
            leaf_hash(key, value),
            internal_hash(&atom_hash(key), &atom_hash(value))
        );
    }

    #[test]
    fn test_internal_hash_is_order_sensitive() {
        let left = [0x11; 32];
        let right = [0x22; 32];
        assert_ne!(internal_hash(&left, &right), internal_hash(&right, &left));
    }

    #[test]
    fn test_calculate_internal_hash_sides() {
        let this = [0x11; 32];
        let other = [0x22; 32];
        assert_eq!(
            calculate_internal_hash(&this, Side::Left, &other),
            internal_hash(&other, &this)
        );
        assert_eq!(
            calculate_internal_hash(&this, Side::Right, &other),
            internal_hash(&this, &other)
        );
    }

    #[test]
    fn test_atom_hash_domain_separation() {
        // An atom hash never collides with hashing the raw bytes as a pair
        // prefix would produce.
        assert_ne!(atom_hash(&[]), internal_hash(&[0; 32], &[0; 32]));
        assert_eq!(atom_hash(b"x").len(), 32);
    }
}
