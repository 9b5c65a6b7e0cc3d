mod bytes;
pub mod hash;
pub mod keys;
pub mod merkle;
pub mod signature;

pub use hash::{hash_blake3, Hash};
pub use keys::{KeyPair, PublicKey, SecretKey, KEY_TYPE_ED25519};
pub use merkle::{hash_from_byte_slices, proofs_from_byte_slices, MerkleProof};
pub use signature::{sign, verify, Sig};
