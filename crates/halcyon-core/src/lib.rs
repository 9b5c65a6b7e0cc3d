//! Halcyon Core - Core types, cryptography, and serialization
//!
//! This crate provides the data model shared by every other Halcyon crate:
//! blocks, votes, commits, validator sets with proposer rotation, consensus
//! parameters and the genesis document, plus the hashing, signing and Merkle
//! primitives they are built from.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod service;
pub mod time;
pub mod types;

pub use crypto::{
    hash_blake3, hash_from_byte_slices, proofs_from_byte_slices, sign, verify, Hash, KeyPair,
    MerkleProof, PublicKey, SecretKey, Sig, KEY_TYPE_ED25519,
};
pub use error::{CommitError, CoreError, ServiceError, ValidatorSetError, VoteError};
pub use service::{Lifecycle, Service};
pub use time::now_millis;
pub use types::*;
