//! Merkle Hashing and Proofs
//!
//! The tree-hash scheme and the proof-of-inclusion structures built on it.

pub mod hash;
pub mod proof;

pub use hash::{atom_hash, calculate_internal_hash, internal_hash, leaf_hash};
pub use proof::{ProofOfInclusion, ProofOfInclusionLayer};
