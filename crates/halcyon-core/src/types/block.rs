use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hash_blake3, hash_from_byte_slices, Hash, PublicKey};
use crate::error::CoreError;
use crate::serialize::CanonicalEncoder;
use crate::types::commit::Commit;
use crate::types::evidence::Evidence;

/// Version of the block layout produced by this crate.
pub const BLOCK_PROTOCOL: u64 = 11;

/// Longest chain id a genesis document may declare.
pub const MAX_CHAIN_ID_LEN: usize = 50;

/// An opaque transaction; its meaning belongs to the application.
pub type Tx = Vec<u8>;

pub fn tx_hash(tx: &[u8]) -> Hash {
    hash_blake3(tx)
}

/// Merkle root over the hashes of `txs`.
pub fn txs_hash(txs: &[Tx]) -> Hash {
    let hashes: Vec<Hash> = txs.iter().map(|tx| tx_hash(tx)).collect();
    let leaves: Vec<&[u8]> = hashes.iter().map(|h| &h.0[..]).collect();
    hash_from_byte_slices(&leaves)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub block: u64,
    pub app: u64,
}

/// Identifies a block by its header hash. The zero hash is the nil id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Hash,
}

impl BlockId {
    pub fn new(hash: Hash) -> Self {
        BlockId { hash }
    }

    pub fn nil() -> Self {
        BlockId { hash: Hash::ZERO }
    }

    pub fn is_nil(&self) -> bool {
        self.hash.is_zero()
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "BlockId(nil)")
        } else {
            write!(f, "BlockId({})", self.hash.short())
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "nil")
        } else {
            write!(f, "{}", self.hash.short())
        }
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: Version,
    pub chain_id: String,
    pub height: u64,
    /// Milliseconds since the Unix epoch
    pub time: u64,
    pub last_block_id: BlockId,
    pub last_commit_hash: Hash,
    pub data_hash: Hash,
    pub validators_hash: Hash,
    pub next_validators_hash: Hash,
    pub consensus_hash: Hash,
    /// Opaque application state hash after the previous block
    pub app_hash: Vec<u8>,
    pub last_results_hash: Hash,
    pub evidence_hash: Hash,
    pub proposer_address: PublicKey,
}

impl Header {
    /// Merkle root over the canonical encoding of every field.
    pub fn hash(&self) -> Hash {
        let fields: Vec<Vec<u8>> = vec![
            CanonicalEncoder::new()
                .u64(self.version.block)
                .u64(self.version.app)
                .finish(),
            self.chain_id.as_bytes().to_vec(),
            self.height.to_be_bytes().to_vec(),
            self.time.to_be_bytes().to_vec(),
            self.last_block_id.hash.to_vec(),
            self.last_commit_hash.to_vec(),
            self.data_hash.to_vec(),
            self.validators_hash.to_vec(),
            self.next_validators_hash.to_vec(),
            self.consensus_hash.to_vec(),
            self.app_hash.clone(),
            self.last_results_hash.to_vec(),
            self.evidence_hash.to_vec(),
            self.proposer_address.to_vec(),
        ];
        hash_from_byte_slices(&fields)
    }
}

/// A block: header, transactions, evidence and the commit for the previous
/// height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub data: Vec<Tx>,
    pub evidence: Vec<Evidence>,
    pub last_commit: Commit,
}

impl Block {
    /// Assemble a block, filling the header hashes derived from the body.
    pub fn from_parts(
        mut header: Header,
        data: Vec<Tx>,
        evidence: Vec<Evidence>,
        last_commit: Commit,
    ) -> Self {
        header.last_commit_hash = last_commit.hash();
        header.data_hash = txs_hash(&data);
        header.evidence_hash = evidence_hash(&evidence);
        Block {
            header,
            data,
            evidence,
            last_commit,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn block_id(&self) -> BlockId {
        BlockId::new(self.hash())
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Checks that need no chain state: body hashes match the header.
    pub fn validate_basic(&self) -> Result<(), CoreError> {
        if self.header.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(CoreError::InvalidBlock(format!(
                "chain id is too long, max {}",
                MAX_CHAIN_ID_LEN
            )));
        }
        if self.header.height == 0 {
            return Err(CoreError::InvalidBlock("zero height".into()));
        }
        if self.header.last_commit_hash != self.last_commit.hash() {
            return Err(CoreError::InvalidBlock(format!(
                "wrong last commit hash: header {} computed {}",
                self.header.last_commit_hash,
                self.last_commit.hash()
            )));
        }
        if self.header.data_hash != txs_hash(&self.data) {
            return Err(CoreError::InvalidBlock("wrong data hash".into()));
        }
        if self.header.evidence_hash != evidence_hash(&self.evidence) {
            return Err(CoreError::InvalidBlock("wrong evidence hash".into()));
        }
        for ev in &self.evidence {
            ev.validate_basic()?;
        }
        Ok(())
    }

    /// Approximate encoded size, used for proposal byte limits.
    pub fn size(&self) -> usize {
        let txs: usize = self.data.iter().map(|tx| tx.len()).sum();
        let evidence: usize = self.evidence.iter().map(|ev| ev.bytes().len()).sum();
        txs + evidence + self.last_commit.signatures.len() * 112 + 512
    }
}

pub fn evidence_hash(evidence: &[Evidence]) -> Hash {
    let leaves: Vec<Vec<u8>> = evidence.iter().map(|ev| ev.bytes()).collect();
    hash_from_byte_slices(&leaves)
}
