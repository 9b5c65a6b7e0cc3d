use std::collections::{BTreeMap, HashMap};

use halcyon_core::{BlockId, ValidatorSet, Vote, VoteError, VoteType};
use tracing::debug;

use crate::vote_set::VoteSet;

/// Rounds ahead of the current one a single peer may open.
const MAX_CATCHUP_ROUNDS: usize = 2;

#[derive(Debug, Clone)]
struct RoundVoteSet {
    prevotes: VoteSet,
    precommits: VoteSet,
}

/// Every prevote and precommit of one height, by round.
///
/// Rounds up to `round() + 1` always exist. Votes for later rounds are
/// accepted from each peer for at most two extra rounds, which bounds the
/// memory a peer can make us spend while still allowing round skips.
#[derive(Debug, Clone)]
pub struct HeightVoteSet {
    chain_id: String,
    height: u64,
    val_set: ValidatorSet,
    round: u32,
    round_vote_sets: BTreeMap<u32, RoundVoteSet>,
    peer_catchup_rounds: HashMap<String, Vec<u32>>,
}

impl HeightVoteSet {
    pub fn new(chain_id: impl Into<String>, height: u64, val_set: ValidatorSet) -> Self {
        let mut hvs = HeightVoteSet {
            chain_id: chain_id.into(),
            height,
            val_set,
            round: 0,
            round_vote_sets: BTreeMap::new(),
            peer_catchup_rounds: HashMap::new(),
        };
        hvs.add_round(0);
        hvs
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Create vote sets for every round up to and including `round`.
    pub fn set_round(&mut self, round: u32) {
        let from = self.round.saturating_sub(1);
        for r in from..=round {
            if !self.round_vote_sets.contains_key(&r) {
                self.add_round(r);
            }
        }
        self.round = self.round.max(round);
    }

    fn add_round(&mut self, round: u32) {
        debug!(height = self.height, round, "adding vote sets for round");
        self.round_vote_sets.insert(
            round,
            RoundVoteSet {
                prevotes: VoteSet::new(
                    self.chain_id.clone(),
                    self.height,
                    round,
                    VoteType::Prevote,
                    self.val_set.clone(),
                ),
                precommits: VoteSet::new(
                    self.chain_id.clone(),
                    self.height,
                    round,
                    VoteType::Precommit,
                    self.val_set.clone(),
                ),
            },
        );
    }

    /// Add a vote, opening its round when the sender still has catch-up
    /// rounds left. `peer_id` is `None` for our own votes.
    pub fn add_vote(&mut self, vote: Vote, peer_id: Option<&str>) -> Result<bool, VoteError> {
        if vote.height != self.height {
            return Err(VoteError::UnexpectedStep {
                height: vote.height,
                round: vote.round,
                vote_type: vote.vote_type,
            });
        }
        if !self.round_vote_sets.contains_key(&vote.round) {
            let rounds = self
                .peer_catchup_rounds
                .entry(peer_id.unwrap_or_default().to_string())
                .or_default();
            if rounds.len() >= MAX_CATCHUP_ROUNDS {
                return Err(VoteError::UnwantedRound(vote.round));
            }
            rounds.push(vote.round);
            self.add_round(vote.round);
        }
        let set = self
            .vote_set_mut(vote.round, vote.vote_type)
            .ok_or(VoteError::UnwantedRound(vote.round))?;
        set.add_vote(vote)
    }

    pub fn prevotes(&self, round: u32) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|rvs| &rvs.prevotes)
    }

    pub fn precommits(&self, round: u32) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|rvs| &rvs.precommits)
    }

    fn vote_set_mut(&mut self, round: u32, vote_type: VoteType) -> Option<&mut VoteSet> {
        let rvs = self.round_vote_sets.get_mut(&round)?;
        Some(match vote_type {
            VoteType::Prevote => &mut rvs.prevotes,
            VoteType::Precommit => &mut rvs.precommits,
        })
    }

    /// Highest round (not above the current one) with a prevote majority,
    /// and the block it was for.
    pub fn pol_info(&self) -> Option<(u32, BlockId)> {
        self.round_vote_sets
            .range(..=self.round)
            .rev()
            .find_map(|(round, rvs)| rvs.prevotes.two_thirds_majority().map(|id| (*round, id)))
    }
}
