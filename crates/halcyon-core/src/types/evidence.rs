use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash, PublicKey};
use crate::error::CoreError;
use crate::serialize::CanonicalEncoder;
use crate::types::validator::ValidatorSet;
use crate::types::vote::Vote;

/// Proof of validator misbehaviour, included in blocks and handed to the
/// application at BeginBlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    DuplicateVote(DuplicateVoteEvidence),
}

impl Evidence {
    pub fn height(&self) -> u64 {
        match self {
            Evidence::DuplicateVote(ev) => ev.vote_a.height,
        }
    }

    /// Time of the block at the evidence height, in milliseconds.
    pub fn time(&self) -> u64 {
        match self {
            Evidence::DuplicateVote(ev) => ev.timestamp,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Evidence::DuplicateVote(ev) => ev.bytes(),
        }
    }

    pub fn hash(&self) -> Hash {
        hash_blake3(&self.bytes())
    }

    pub fn validate_basic(&self) -> Result<(), CoreError> {
        match self {
            Evidence::DuplicateVote(ev) => ev.validate_basic(),
        }
    }

    /// The misbehaving validator together with its power at the time.
    pub fn offender(&self) -> (PublicKey, i64) {
        match self {
            Evidence::DuplicateVote(ev) => (ev.vote_a.validator_address, ev.validator_power),
        }
    }

    pub fn total_voting_power(&self) -> i64 {
        match self {
            Evidence::DuplicateVote(ev) => ev.total_voting_power,
        }
    }
}

/// Two conflicting votes signed by the same validator for the same height,
/// round and vote type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateVoteEvidence {
    pub vote_a: Vote,
    pub vote_b: Vote,
    pub total_voting_power: i64,
    pub validator_power: i64,
    pub timestamp: u64,
}

impl DuplicateVoteEvidence {
    /// Returns `None` when the voter is not in `val_set`. Votes are stored
    /// ordered by block id so the same pair always yields the same evidence.
    pub fn new(vote1: Vote, vote2: Vote, block_time: u64, val_set: &ValidatorSet) -> Option<Self> {
        let (_, validator) = val_set.get_by_address(&vote1.validator_address)?;
        let validator_power = validator.voting_power;
        let (vote_a, vote_b) = if vote1.block_id <= vote2.block_id {
            (vote1, vote2)
        } else {
            (vote2, vote1)
        };
        Some(DuplicateVoteEvidence {
            vote_a,
            vote_b,
            total_voting_power: val_set.total_voting_power(),
            validator_power,
            timestamp: block_time,
        })
    }

    pub fn validate_basic(&self) -> Result<(), CoreError> {
        let (a, b) = (&self.vote_a, &self.vote_b);
        if a.height != b.height || a.round != b.round || a.vote_type != b.vote_type {
            return Err(CoreError::InvalidEvidence(
                "votes are for different height, round or type".into(),
            ));
        }
        if a.validator_address != b.validator_address {
            return Err(CoreError::InvalidEvidence("votes from different validators".into()));
        }
        if a.block_id == b.block_id {
            return Err(CoreError::InvalidEvidence("votes do not conflict".into()));
        }
        if a.block_id > b.block_id {
            return Err(CoreError::InvalidEvidence("votes are not ordered".into()));
        }
        Ok(())
    }

    /// Check both signatures against the offender's key.
    pub fn verify(&self, chain_id: &str, pub_key: &PublicKey) -> Result<(), CoreError> {
        self.validate_basic()?;
        self.vote_a
            .verify(chain_id, pub_key)
            .map_err(|e| CoreError::InvalidEvidence(format!("vote a: {}", e)))?;
        self.vote_b
            .verify(chain_id, pub_key)
            .map_err(|e| CoreError::InvalidEvidence(format!("vote b: {}", e)))?;
        Ok(())
    }

    fn bytes(&self) -> Vec<u8> {
        let vote = |enc: CanonicalEncoder, v: &Vote| {
            enc.u64(v.height)
                .u32(v.round)
                .fixed(v.block_id.hash.as_bytes())
                .u64(v.timestamp)
                .fixed(v.validator_address.as_bytes())
                .fixed(v.signature.as_bytes())
        };
        let enc = vote(CanonicalEncoder::new().u8(1), &self.vote_a);
        vote(enc, &self.vote_b)
            .i64(self.total_voting_power)
            .i64(self.validator_power)
            .u64(self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Sig};
    use crate::types::block::BlockId;
    use crate::types::validator::Validator;
    use crate::types::vote::VoteType;

    fn vote(kp: &KeyPair, block: &[u8]) -> Vote {
        let mut v = Vote {
            vote_type: VoteType::Prevote,
            height: 3,
            round: 0,
            block_id: BlockId::new(hash_blake3(block)),
            timestamp: 1,
            validator_address: kp.public,
            validator_index: 0,
            signature: Sig::default(),
        };
        v.sign("c", &kp.secret);
        v
    }

    #[test]
    fn test_duplicate_vote_evidence_is_order_independent() {
        let kp = KeyPair::from_secret_bytes(&[4u8; 32]);
        let vs = ValidatorSet::new(vec![Validator::new(kp.public, 10)]).unwrap();
        let (v1, v2) = (vote(&kp, b"x"), vote(&kp, b"y"));

        let ev1 = DuplicateVoteEvidence::new(v1.clone(), v2.clone(), 9, &vs).unwrap();
        let ev2 = DuplicateVoteEvidence::new(v2, v1, 9, &vs).unwrap();
        assert_eq!(ev1, ev2);
        ev1.verify("c", &kp.public).unwrap();

        let ev = Evidence::DuplicateVote(ev1);
        assert_eq!(ev.height(), 3);
        assert_eq!(ev.offender(), (kp.public, 10));
    }

    #[test]
    fn test_same_block_is_not_evidence() {
        let kp = KeyPair::from_secret_bytes(&[4u8; 32]);
        let vs = ValidatorSet::new(vec![Validator::new(kp.public, 10)]).unwrap();
        let ev = DuplicateVoteEvidence::new(vote(&kp, b"x"), vote(&kp, b"x"), 9, &vs).unwrap();
        assert!(ev.validate_basic().is_err());
    }

    #[test]
    fn test_unknown_validator_gives_no_evidence() {
        let kp = KeyPair::from_secret_bytes(&[4u8; 32]);
        let other = KeyPair::from_secret_bytes(&[5u8; 32]);
        let vs = ValidatorSet::new(vec![Validator::new(other.public, 10)]).unwrap();
        assert!(DuplicateVoteEvidence::new(vote(&kp, b"x"), vote(&kp, b"y"), 9, &vs).is_none());
    }
}
