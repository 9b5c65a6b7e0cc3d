use halcyon_core::{Block, BlockId, Proposal, PublicKey, RoundStep, ValidatorSet};
use halcyon_state::RoundStateEvent;

use crate::height_vote_set::HeightVoteSet;
use crate::vote_set::VoteSet;

/// Everything the machine knows about the height being decided.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub height: u64,
    pub round: u32,
    pub step: RoundStep,
    /// Milliseconds since the Unix epoch at which round 0 may start
    pub start_time: u64,
    /// Time the commit step was entered, 0 before that
    pub commit_time: u64,
    pub validators: ValidatorSet,
    pub proposal: Option<Proposal>,
    pub proposal_block: Option<Block>,
    /// Block id whose body we are waiting for: from the proposal, a polka
    /// or the commit
    pub wanted_block: Option<BlockId>,
    pub locked_round: Option<u32>,
    pub locked_block: Option<Block>,
    pub valid_round: Option<u32>,
    pub valid_block: Option<Block>,
    pub votes: HeightVoteSet,
    pub commit_round: Option<u32>,
    /// Precommits that decided the previous height
    pub last_commit: Option<VoteSet>,
    pub last_validators: ValidatorSet,
    pub triggered_timeout_precommit: bool,
}

impl RoundState {
    pub fn new(chain_id: &str, height: u64, validators: ValidatorSet) -> Self {
        RoundState {
            height,
            round: 0,
            step: RoundStep::NewHeight,
            start_time: 0,
            commit_time: 0,
            votes: HeightVoteSet::new(chain_id, height, validators.clone()),
            validators,
            proposal: None,
            proposal_block: None,
            wanted_block: None,
            locked_round: None,
            locked_block: None,
            valid_round: None,
            valid_block: None,
            commit_round: None,
            last_commit: None,
            last_validators: ValidatorSet::default(),
            triggered_timeout_precommit: false,
        }
    }

    pub fn event(&self) -> RoundStateEvent {
        RoundStateEvent {
            height: self.height,
            round: self.round,
            step: self.step,
        }
    }

    pub fn proposal_block_id(&self) -> Option<BlockId> {
        self.proposal_block.as_ref().map(Block::block_id)
    }

    pub fn locked_block_id(&self) -> Option<BlockId> {
        self.locked_block.as_ref().map(Block::block_id)
    }

    /// The proposal and its block are both here, and when the proposal
    /// re-proposes an earlier polka we have seen that polka too.
    pub fn is_proposal_complete(&self) -> bool {
        let (Some(proposal), Some(_)) = (&self.proposal, &self.proposal_block) else {
            return false;
        };
        match proposal.pol_round {
            None => true,
            Some(pol_round) => self
                .votes
                .prevotes(pol_round)
                .is_some_and(|prevotes| prevotes.has_two_thirds_majority()),
        }
    }

    pub fn summary(&self, last_block_height: u64, app_hash: &[u8]) -> RoundStateSummary {
        RoundStateSummary {
            height: self.height,
            round: self.round,
            step: self.step,
            proposer: self.validators.get_proposer().map(|v| v.pub_key),
            proposal_block_id: self.proposal_block_id(),
            locked_round: self.locked_round,
            locked_block_id: self.locked_block_id(),
            valid_round: self.valid_round,
            valid_block_id: self.valid_block.as_ref().map(Block::block_id),
            commit_round: self.commit_round,
            last_block_height,
            app_hash: app_hash.to_vec(),
        }
    }
}

/// Read-only view of the round state published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStateSummary {
    pub height: u64,
    pub round: u32,
    pub step: RoundStep,
    pub proposer: Option<PublicKey>,
    pub proposal_block_id: Option<BlockId>,
    pub locked_round: Option<u32>,
    pub locked_block_id: Option<BlockId>,
    pub valid_round: Option<u32>,
    pub valid_block_id: Option<BlockId>,
    pub commit_round: Option<u32>,
    /// Height of the last committed block
    pub last_block_height: u64,
    pub app_hash: Vec<u8>,
}
