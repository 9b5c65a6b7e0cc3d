use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{sign, verify, PublicKey, SecretKey, Sig};
use crate::error::{CoreError, VoteError};
use crate::serialize::CanonicalEncoder;
use crate::types::block::BlockId;
use crate::types::commit::CommitSig;

const PROPOSAL_TAG: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoteType {
    Prevote,
    Precommit,
}

impl VoteType {
    fn tag(self) -> u8 {
        match self {
            VoteType::Prevote => 1,
            VoteType::Precommit => 2,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::Prevote => write!(f, "prevote"),
            VoteType::Precommit => write!(f, "precommit"),
        }
    }
}

/// A signed prevote or precommit. A nil vote carries `BlockId::nil()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub validator_address: PublicKey,
    pub validator_index: u32,
    pub signature: Sig,
}

impl Vote {
    /// Bytes covered by the signature. The validator identity is not part of
    /// them; it is bound by the key that verifies the signature.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        vote_sign_bytes(
            chain_id,
            self.vote_type,
            self.height,
            self.round,
            &self.block_id,
            self.timestamp,
        )
    }

    pub fn sign(&mut self, chain_id: &str, key: &SecretKey) {
        self.signature = sign(key, &self.sign_bytes(chain_id));
    }

    pub fn verify(&self, chain_id: &str, pub_key: &PublicKey) -> Result<(), VoteError> {
        if self.validator_address != *pub_key {
            return Err(VoteError::InvalidValidatorAddress(self.validator_address));
        }
        verify(pub_key, &self.sign_bytes(chain_id), &self.signature)
            .map_err(|_| VoteError::InvalidSignature)
    }

    pub fn is_nil(&self) -> bool {
        self.block_id.is_nil()
    }

    /// The commit entry this precommit contributes.
    pub fn to_commit_sig(&self) -> CommitSig {
        if self.block_id.is_nil() {
            CommitSig::Nil {
                validator_address: self.validator_address,
                timestamp: self.timestamp,
                signature: self.signature,
            }
        } else {
            CommitSig::Commit {
                validator_address: self.validator_address,
                timestamp: self.timestamp,
                signature: self.signature,
            }
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote{{{}:{} {}/{} {} {}}}",
            self.validator_index,
            self.validator_address.short(),
            self.height,
            self.round,
            self.vote_type,
            self.block_id
        )
    }
}

pub(crate) fn vote_sign_bytes(
    chain_id: &str,
    vote_type: VoteType,
    height: u64,
    round: u32,
    block_id: &BlockId,
    timestamp: u64,
) -> Vec<u8> {
    CanonicalEncoder::new()
        .u8(vote_type.tag())
        .u64(height)
        .u32(round)
        .fixed(block_id.hash.as_bytes())
        .u64(timestamp)
        .str(chain_id)
        .finish()
}

/// Two votes by one validator for the same height, round and type that
/// disagree on the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingVotes {
    pub vote_a: Vote,
    pub vote_b: Vote,
}

/// Proposal for a block at (height, round). `pol_round` names the round of
/// the polka that justifies re-proposing a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub height: u64,
    pub round: u32,
    pub pol_round: Option<u32>,
    pub block_id: BlockId,
    pub timestamp: u64,
    pub signature: Sig,
}

impl Proposal {
    pub fn new(height: u64, round: u32, pol_round: Option<u32>, block_id: BlockId, timestamp: u64) -> Self {
        Proposal {
            height,
            round,
            pol_round,
            block_id,
            timestamp,
            signature: Sig::default(),
        }
    }

    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        CanonicalEncoder::new()
            .u8(PROPOSAL_TAG)
            .u64(self.height)
            .u32(self.round)
            .i64(self.pol_round.map_or(-1, i64::from))
            .fixed(self.block_id.hash.as_bytes())
            .u64(self.timestamp)
            .str(chain_id)
            .finish()
    }

    pub fn verify(&self, chain_id: &str, pub_key: &PublicKey) -> Result<(), CoreError> {
        verify(pub_key, &self.sign_bytes(chain_id), &self.signature)
    }

    pub fn validate_basic(&self) -> Result<(), CoreError> {
        if self.height == 0 {
            return Err(CoreError::InvalidBlock("proposal at height 0".into()));
        }
        if let Some(pol_round) = self.pol_round {
            if pol_round >= self.round {
                return Err(CoreError::InvalidBlock(format!(
                    "pol round {} not below round {}",
                    pol_round, self.round
                )));
            }
        }
        if self.block_id.is_nil() {
            return Err(CoreError::InvalidBlock("proposal for nil block".into()));
        }
        if self.signature.is_empty() {
            return Err(CoreError::InvalidSignature);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_blake3, KeyPair};

    fn vote(kp: &KeyPair, block_id: BlockId) -> Vote {
        let mut v = Vote {
            vote_type: VoteType::Prevote,
            height: 1,
            round: 0,
            block_id,
            timestamp: 1000,
            validator_address: kp.public,
            validator_index: 0,
            signature: Sig::default(),
        };
        v.sign("chain", &kp.secret);
        v
    }

    #[test]
    fn test_vote_sign_verify() {
        let kp = KeyPair::from_secret_bytes(&[1u8; 32]);
        let v = vote(&kp, BlockId::new(hash_blake3(b"b")));
        v.verify("chain", &kp.public).unwrap();
        assert_eq!(v.verify("other-chain", &kp.public), Err(VoteError::InvalidSignature));
    }

    #[test]
    fn test_vote_wrong_address() {
        let kp = KeyPair::from_secret_bytes(&[1u8; 32]);
        let other = KeyPair::from_secret_bytes(&[2u8; 32]);
        let v = vote(&kp, BlockId::nil());
        assert!(matches!(
            v.verify("chain", &other.public),
            Err(VoteError::InvalidValidatorAddress(_))
        ));
    }

    #[test]
    fn test_sign_bytes_depend_on_type() {
        let kp = KeyPair::from_secret_bytes(&[1u8; 32]);
        let prevote = vote(&kp, BlockId::nil());
        let mut precommit = prevote.clone();
        precommit.vote_type = VoteType::Precommit;
        assert_ne!(prevote.sign_bytes("c"), precommit.sign_bytes("c"));
    }

    #[test]
    fn test_nil_vote_commit_sig() {
        let kp = KeyPair::from_secret_bytes(&[1u8; 32]);
        assert!(matches!(vote(&kp, BlockId::nil()).to_commit_sig(), CommitSig::Nil { .. }));
        assert!(matches!(
            vote(&kp, BlockId::new(hash_blake3(b"b"))).to_commit_sig(),
            CommitSig::Commit { .. }
        ));
    }

    #[test]
    fn test_proposal_validate_basic() {
        let kp = KeyPair::from_secret_bytes(&[1u8; 32]);
        let mut p = Proposal::new(1, 2, Some(1), BlockId::new(hash_blake3(b"b")), 5);
        assert!(p.validate_basic().is_err());
        p.signature = sign(&kp.secret, &p.sign_bytes("c"));
        p.validate_basic().unwrap();
        p.verify("c", &kp.public).unwrap();

        p.pol_round = Some(2);
        assert!(p.validate_basic().is_err());
    }
}
