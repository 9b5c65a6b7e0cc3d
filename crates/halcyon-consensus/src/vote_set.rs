use std::collections::HashMap;
use std::fmt;

use halcyon_core::{BlockId, Commit, CommitSig, ConflictingVotes, ValidatorSet, Vote, VoteError, VoteType};
use tracing::debug;

/// Votes of one block id, indexed by validator.
#[derive(Debug, Clone)]
struct BlockVotes {
    votes: Vec<Option<Vote>>,
    sum: i64,
}

impl BlockVotes {
    fn new(size: usize) -> Self {
        BlockVotes {
            votes: vec![None; size],
            sum: 0,
        }
    }

    fn add(&mut self, vote: Vote, power: i64) {
        let index = vote.validator_index as usize;
        if self.votes[index].is_none() {
            self.votes[index] = Some(vote);
            self.sum += power;
        }
    }
}

/// Prevotes or precommits of one (height, round), with running power
/// totals per block id.
///
/// Each validator is counted once: a second vote for a different block is
/// rejected as conflicting and handed back so it can become evidence.
#[derive(Debug, Clone)]
pub struct VoteSet {
    chain_id: String,
    height: u64,
    round: u32,
    vote_type: VoteType,
    val_set: ValidatorSet,

    votes: Vec<Option<Vote>>,
    sum: i64,
    votes_by_block: HashMap<BlockId, BlockVotes>,
    maj23: Option<BlockId>,
}

impl VoteSet {
    pub fn new(
        chain_id: impl Into<String>,
        height: u64,
        round: u32,
        vote_type: VoteType,
        val_set: ValidatorSet,
    ) -> Self {
        let size = val_set.len();
        VoteSet {
            chain_id: chain_id.into(),
            height,
            round,
            vote_type,
            val_set,
            votes: vec![None; size],
            sum: 0,
            votes_by_block: HashMap::new(),
            maj23: None,
        }
    }

    /// Rebuild the precommit set behind a stored commit. Used on restart
    /// to recover the last commit of the previous height.
    pub fn from_commit(chain_id: &str, commit: &Commit, val_set: &ValidatorSet) -> Result<Self, VoteError> {
        let mut set = VoteSet::new(
            chain_id,
            commit.height,
            commit.round,
            VoteType::Precommit,
            val_set.clone(),
        );
        for index in 0..commit.signatures.len() {
            if let Some(vote) = commit.get_vote(index) {
                set.add_vote(vote)?;
            }
        }
        Ok(set)
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    pub fn size(&self) -> usize {
        self.val_set.len()
    }

    /// Add a signed vote.
    ///
    /// Returns `Ok(true)` when the vote was new, `Ok(false)` for an exact
    /// duplicate. A second vote from the same validator for another block
    /// yields `VoteError::ConflictingVote` carrying both votes.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteError> {
        if vote.height != self.height || vote.round != self.round || vote.vote_type != self.vote_type {
            return Err(VoteError::UnexpectedStep {
                height: vote.height,
                round: vote.round,
                vote_type: vote.vote_type,
            });
        }

        let index = vote.validator_index;
        let validator = self
            .val_set
            .get_by_index(index as usize)
            .ok_or(VoteError::InvalidValidatorIndex(index))?;
        if vote.validator_address != validator.pub_key {
            return Err(VoteError::InvalidValidatorAddress(vote.validator_address));
        }
        let power = validator.voting_power;

        if let Some(existing) = self.get_by_block(index as usize, &vote.block_id) {
            if existing.signature == vote.signature {
                return Ok(false);
            }
            return Err(VoteError::NonDeterministicSignature);
        }

        vote.verify(&self.chain_id, &validator.pub_key)?;

        if let Some(existing) = &self.votes[index as usize] {
            return Err(VoteError::ConflictingVote(Box::new(ConflictingVotes {
                vote_a: existing.clone(),
                vote_b: vote,
            })));
        }

        self.votes[index as usize] = Some(vote.clone());
        self.sum += power;

        let size = self.size();
        let block_votes = self
            .votes_by_block
            .entry(vote.block_id)
            .or_insert_with(|| BlockVotes::new(size));
        let orig_sum = block_votes.sum;
        block_votes.add(vote.clone(), power);
        let new_sum = block_votes.sum;

        if self.maj23.is_none() && !self.val_set.is_quorum(orig_sum) && self.val_set.is_quorum(new_sum) {
            self.maj23 = Some(vote.block_id);
            debug!(
                height = self.height,
                round = self.round,
                vote_type = %self.vote_type,
                block = %vote.block_id,
                "two thirds majority"
            );
        }

        Ok(true)
    }

    fn get_by_block(&self, index: usize, block_id: &BlockId) -> Option<&Vote> {
        let existing = self.votes.get(index)?.as_ref()?;
        if existing.block_id == *block_id {
            return Some(existing);
        }
        self.votes_by_block.get(block_id)?.votes.get(index)?.as_ref()
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Vote> {
        self.votes.get(index)?.as_ref()
    }

    pub fn get_by_address(&self, address: &halcyon_core::PublicKey) -> Option<&Vote> {
        let (index, _) = self.val_set.get_by_address(address)?;
        self.get_by_index(index)
    }

    /// Total power of every validator that voted, whatever the block.
    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn has_two_thirds_majority(&self) -> bool {
        self.maj23.is_some()
    }

    /// The block id (possibly nil) with more than 2/3 of the voting power.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.maj23
    }

    /// More than 2/3 of the power voted, not necessarily for one block.
    pub fn has_two_thirds_any(&self) -> bool {
        self.val_set.is_quorum(self.sum)
    }

    pub fn has_all(&self) -> bool {
        self.sum == self.val_set.total_voting_power()
    }

    pub fn bit_array(&self) -> Vec<bool> {
        self.votes.iter().map(Option::is_some).collect()
    }

    /// Power voted for `block_id`.
    pub fn block_power(&self, block_id: &BlockId) -> i64 {
        self.votes_by_block.get(block_id).map_or(0, |bv| bv.sum)
    }

    /// Commit for the majority block. Precommits for other blocks are
    /// recorded as absent.
    pub fn make_commit(&self) -> Option<Commit> {
        if self.vote_type != VoteType::Precommit {
            return None;
        }
        let block_id = self.maj23.filter(|id| !id.is_nil())?;
        let signatures = self
            .votes
            .iter()
            .map(|vote| match vote {
                Some(vote) if vote.is_nil() || vote.block_id == block_id => vote.to_commit_sig(),
                _ => CommitSig::Absent,
            })
            .collect();
        Some(Commit {
            height: self.height,
            round: self.round,
            block_id,
            signatures,
        })
    }
}

impl fmt::Display for VoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: String = self
            .bit_array()
            .iter()
            .map(|b| if *b { 'x' } else { '_' })
            .collect();
        write!(
            f,
            "VoteSet{{{}/{} {} {} {}/{}",
            self.height,
            self.round,
            self.vote_type,
            bits,
            self.sum,
            self.val_set.total_voting_power()
        )?;
        if let Some(maj) = self.maj23 {
            write!(f, " maj23={}", maj)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_core::{hash_blake3, KeyPair, Sig, Validator};

    fn keys(n: u8) -> Vec<KeyPair> {
        (1..=n).map(|i| KeyPair::from_secret_bytes(&[i; 32])).collect()
    }

    fn val_set(keys: &[KeyPair], power: i64) -> ValidatorSet {
        ValidatorSet::new(keys.iter().map(|k| Validator::new(k.public, power)).collect()).unwrap()
    }

    fn vote(set: &ValidatorSet, keys: &[KeyPair], index: usize, vote_type: VoteType, block_id: BlockId) -> Vote {
        let address = set.get_by_index(index).unwrap().pub_key;
        let key = keys.iter().find(|k| k.public == address).unwrap();
        let mut vote = Vote {
            vote_type,
            height: 1,
            round: 0,
            block_id,
            timestamp: 1_000 + index as u64,
            validator_address: address,
            validator_index: index as u32,
            signature: Sig::default(),
        };
        vote.sign("vs-test", &key.secret);
        vote
    }

    fn block(tag: &[u8]) -> BlockId {
        BlockId::new(hash_blake3(tag))
    }

    #[test]
    fn test_majority_after_three_of_four() {
        let keys = keys(4);
        let set = val_set(&keys, 10);
        let mut votes = VoteSet::new("vs-test", 1, 0, VoteType::Prevote, set.clone());
        let a = block(b"a");

        for i in 0..2 {
            assert!(votes.add_vote(vote(&set, &keys, i, VoteType::Prevote, a)).unwrap());
        }
        assert!(!votes.has_two_thirds_majority());
        assert!(!votes.has_two_thirds_any());

        votes.add_vote(vote(&set, &keys, 2, VoteType::Prevote, a)).unwrap();
        assert_eq!(votes.two_thirds_majority(), Some(a));
        assert!(votes.has_two_thirds_any());
        assert!(!votes.has_all());
        assert_eq!(votes.block_power(&a), 30);
    }

    #[test]
    fn test_split_votes_have_any_but_no_majority() {
        let keys = keys(4);
        let set = val_set(&keys, 10);
        let mut votes = VoteSet::new("vs-test", 1, 0, VoteType::Prevote, set.clone());

        votes.add_vote(vote(&set, &keys, 0, VoteType::Prevote, block(b"a"))).unwrap();
        votes.add_vote(vote(&set, &keys, 1, VoteType::Prevote, block(b"b"))).unwrap();
        votes.add_vote(vote(&set, &keys, 2, VoteType::Prevote, BlockId::nil())).unwrap();

        assert!(votes.has_two_thirds_any());
        assert_eq!(votes.two_thirds_majority(), None);
    }

    #[test]
    fn test_nil_majority() {
        let keys = keys(4);
        let set = val_set(&keys, 10);
        let mut votes = VoteSet::new("vs-test", 1, 0, VoteType::Precommit, set.clone());
        for i in 0..3 {
            votes.add_vote(vote(&set, &keys, i, VoteType::Precommit, BlockId::nil())).unwrap();
        }
        assert_eq!(votes.two_thirds_majority(), Some(BlockId::nil()));
        assert!(votes.make_commit().is_none());
    }

    #[test]
    fn test_duplicate_and_conflicting() {
        let keys = keys(4);
        let set = val_set(&keys, 10);
        let mut votes = VoteSet::new("vs-test", 1, 0, VoteType::Prevote, set.clone());
        let first = vote(&set, &keys, 0, VoteType::Prevote, block(b"a"));

        assert!(votes.add_vote(first.clone()).unwrap());
        assert!(!votes.add_vote(first.clone()).unwrap());

        let second = vote(&set, &keys, 0, VoteType::Prevote, block(b"b"));
        match votes.add_vote(second.clone()) {
            Err(VoteError::ConflictingVote(cv)) => {
                assert_eq!(cv.vote_a, first);
                assert_eq!(cv.vote_b, second);
            }
            other => panic!("expected conflicting vote, got {:?}", other),
        }
        assert_eq!(votes.sum(), 10);
    }

    #[test]
    fn test_rejects_bad_votes() {
        let keys = keys(4);
        let set = val_set(&keys, 10);
        let mut votes = VoteSet::new("vs-test", 1, 0, VoteType::Prevote, set.clone());

        let wrong_type = vote(&set, &keys, 0, VoteType::Precommit, block(b"a"));
        assert!(matches!(votes.add_vote(wrong_type), Err(VoteError::UnexpectedStep { .. })));

        let mut bad_index = vote(&set, &keys, 0, VoteType::Prevote, block(b"a"));
        bad_index.validator_index = 9;
        assert_eq!(votes.add_vote(bad_index), Err(VoteError::InvalidValidatorIndex(9)));

        let mut bad_sig = vote(&set, &keys, 1, VoteType::Prevote, block(b"a"));
        bad_sig.timestamp += 1;
        assert_eq!(votes.add_vote(bad_sig), Err(VoteError::InvalidSignature));

        let mut swapped = vote(&set, &keys, 1, VoteType::Prevote, block(b"a"));
        swapped.validator_index = 2;
        assert!(matches!(votes.add_vote(swapped), Err(VoteError::InvalidValidatorAddress(_))));
        assert_eq!(votes.sum(), 0);
    }

    #[test]
    fn test_make_commit_marks_other_blocks_absent() {
        let keys = keys(4);
        let set = val_set(&keys, 10);
        let mut votes = VoteSet::new("vs-test", 1, 0, VoteType::Precommit, set.clone());
        let a = block(b"a");

        for i in 0..3 {
            votes.add_vote(vote(&set, &keys, i, VoteType::Precommit, a)).unwrap();
        }
        votes.add_vote(vote(&set, &keys, 3, VoteType::Precommit, block(b"b"))).unwrap();

        let commit = votes.make_commit().unwrap();
        assert_eq!(commit.block_id, a);
        assert_eq!(commit.signatures.iter().filter(|s| s.for_block()).count(), 3);
        assert!(commit.signatures[3].is_absent());
        set.verify_commit("vs-test", &a, 1, &commit).unwrap();

        let rebuilt = VoteSet::from_commit("vs-test", &commit, &set).unwrap();
        assert_eq!(rebuilt.two_thirds_majority(), Some(a));
        assert_eq!(rebuilt.sum(), 30);
    }
}
