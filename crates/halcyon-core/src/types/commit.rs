use serde::{Deserialize, Serialize};

use crate::crypto::{hash_from_byte_slices, Hash, PublicKey, Sig};
use crate::error::CoreError;
use crate::serialize::CanonicalEncoder;
use crate::types::block::BlockId;
use crate::types::vote::{vote_sign_bytes, Vote, VoteType};

/// One validator's entry in a commit, in validator set order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitSig {
    /// No precommit was received from this validator.
    Absent,
    /// Precommit for the committed block.
    Commit {
        validator_address: PublicKey,
        timestamp: u64,
        signature: Sig,
    },
    /// Precommit for nil.
    Nil {
        validator_address: PublicKey,
        timestamp: u64,
        signature: Sig,
    },
}

impl CommitSig {
    pub fn is_absent(&self) -> bool {
        matches!(self, CommitSig::Absent)
    }

    pub fn for_block(&self) -> bool {
        matches!(self, CommitSig::Commit { .. })
    }

    pub fn validator_address(&self) -> Option<&PublicKey> {
        match self {
            CommitSig::Absent => None,
            CommitSig::Commit {
                validator_address, ..
            }
            | CommitSig::Nil {
                validator_address, ..
            } => Some(validator_address),
        }
    }

    pub fn timestamp(&self) -> Option<u64> {
        match self {
            CommitSig::Absent => None,
            CommitSig::Commit { timestamp, .. } | CommitSig::Nil { timestamp, .. } => Some(*timestamp),
        }
    }

    pub fn signature(&self) -> Option<&Sig> {
        match self {
            CommitSig::Absent => None,
            CommitSig::Commit { signature, .. } | CommitSig::Nil { signature, .. } => Some(signature),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            CommitSig::Absent => CanonicalEncoder::new().u8(1).finish(),
            CommitSig::Commit {
                validator_address,
                timestamp,
                signature,
            } => CanonicalEncoder::new()
                .u8(2)
                .fixed(validator_address.as_bytes())
                .u64(*timestamp)
                .fixed(signature.as_bytes())
                .finish(),
            CommitSig::Nil {
                validator_address,
                timestamp,
                signature,
            } => CanonicalEncoder::new()
                .u8(3)
                .fixed(validator_address.as_bytes())
                .u64(*timestamp)
                .fixed(signature.as_bytes())
                .finish(),
        }
    }
}

/// +2/3 precommits for one block, aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// The last commit carried by the first block of a chain.
    pub fn empty() -> Self {
        Commit {
            height: 0,
            round: 0,
            block_id: BlockId::nil(),
            signatures: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self.signatures.iter().map(CommitSig::bytes).collect();
        hash_from_byte_slices(&leaves)
    }

    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    /// Which validators (by index) signed anything.
    pub fn bit_array(&self) -> Vec<bool> {
        self.signatures.iter().map(|sig| !sig.is_absent()).collect()
    }

    fn vote_block_id(&self, sig: &CommitSig) -> BlockId {
        if sig.for_block() {
            self.block_id
        } else {
            BlockId::nil()
        }
    }

    /// Reconstruct the precommit behind entry `index`.
    pub fn get_vote(&self, index: usize) -> Option<Vote> {
        let sig = self.signatures.get(index)?;
        Some(Vote {
            vote_type: VoteType::Precommit,
            height: self.height,
            round: self.round,
            block_id: self.vote_block_id(sig),
            timestamp: sig.timestamp()?,
            validator_address: *sig.validator_address()?,
            validator_index: index as u32,
            signature: *sig.signature()?,
        })
    }

    /// Sign bytes of the precommit behind entry `index`.
    pub fn vote_sign_bytes(&self, chain_id: &str, index: usize) -> Option<Vec<u8>> {
        let sig = self.signatures.get(index)?;
        Some(vote_sign_bytes(
            chain_id,
            VoteType::Precommit,
            self.height,
            self.round,
            &self.vote_block_id(sig),
            sig.timestamp()?,
        ))
    }

    pub fn validate_basic(&self) -> Result<(), CoreError> {
        if self.height == 0 {
            if !self.signatures.is_empty() {
                return Err(CoreError::InvalidBlock("commit at height 0 has signatures".into()));
            }
            return Ok(());
        }
        if self.block_id.is_nil() {
            return Err(CoreError::InvalidBlock("commit for nil block".into()));
        }
        if self.signatures.is_empty() {
            return Err(CoreError::InvalidBlock("commit has no signatures".into()));
        }
        Ok(())
    }
}
