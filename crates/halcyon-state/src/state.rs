use halcyon_core::time::weighted_median;
use halcyon_core::{
    Block, BlockId, Commit, ConsensusParams, Evidence, GenesisDoc, Hash, Header, PublicKey, Tx,
    ValidatorSet, Version, BLOCK_PROTOCOL,
};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// The durable consensus state after the last committed block. It is
/// enough to validate and execute the next block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub version: Version,
    pub chain_id: String,
    pub initial_height: u64,

    /// 0 before the first block is committed
    pub last_block_height: u64,
    pub last_block_id: BlockId,
    pub last_block_time: u64,

    /// Validators for `last_block_height + 2`
    pub next_validators: ValidatorSet,
    /// Validators for `last_block_height + 1`
    pub validators: ValidatorSet,
    /// Validators that signed the last commit
    pub last_validators: ValidatorSet,
    pub last_height_validators_changed: u64,

    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: u64,

    /// Merkle root of the deterministic results of the last block's txs
    pub last_results_hash: Hash,
    /// Application hash after the last block
    pub app_hash: Vec<u8>,
}

impl State {
    /// Height of the next block to be decided.
    pub fn next_height(&self) -> u64 {
        if self.last_block_height == 0 {
            self.initial_height
        } else {
            self.last_block_height + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Build the block for `height` on top of this state. Header hashes of
    /// the body are filled by `Block::from_parts`.
    pub fn make_block(
        &self,
        height: u64,
        txs: Vec<Tx>,
        last_commit: Commit,
        evidence: Vec<Evidence>,
        proposer_address: PublicKey,
    ) -> Block {
        let time = if height == self.initial_height {
            self.last_block_time
        } else {
            median_time(&last_commit, &self.last_validators)
        };

        let header = Header {
            version: self.version,
            chain_id: self.chain_id.clone(),
            height,
            time,
            last_block_id: self.last_block_id,
            last_commit_hash: Hash::ZERO,
            data_hash: Hash::ZERO,
            validators_hash: self.validators.hash(),
            next_validators_hash: self.next_validators.hash(),
            consensus_hash: self.consensus_params.hash(),
            app_hash: self.app_hash.clone(),
            last_results_hash: self.last_results_hash,
            evidence_hash: Hash::ZERO,
            proposer_address,
        };
        Block::from_parts(header, txs, evidence, last_commit)
    }
}

/// The state before the first block, as described by the genesis document.
pub fn make_genesis_state(genesis: &GenesisDoc) -> Result<State, StateError> {
    genesis.consensus_params.validate()?;
    let validators = genesis.validator_set()?;
    let next_validators = validators.copy_increment_proposer_priority(1);

    Ok(State {
        version: Version {
            block: BLOCK_PROTOCOL,
            app: genesis.consensus_params.version.app_version,
        },
        chain_id: genesis.chain_id.clone(),
        initial_height: genesis.initial_height,
        last_block_height: 0,
        last_block_id: BlockId::nil(),
        last_block_time: genesis.genesis_time,
        next_validators,
        validators,
        last_validators: ValidatorSet::default(),
        last_height_validators_changed: genesis.initial_height,
        consensus_params: genesis.consensus_params.clone(),
        last_height_consensus_params_changed: genesis.initial_height,
        last_results_hash: Hash::ZERO,
        app_hash: genesis.app_hash.clone(),
    })
}

/// Power-weighted median of the commit's vote timestamps.
pub fn median_time(commit: &Commit, validators: &ValidatorSet) -> u64 {
    let mut total = 0i64;
    let mut times = Vec::with_capacity(commit.signatures.len());
    for sig in &commit.signatures {
        let (Some(address), Some(timestamp)) = (sig.validator_address(), sig.timestamp()) else {
            continue;
        };
        if let Some((_, validator)) = validators.get_by_address(address) {
            total += validator.voting_power;
            times.push((timestamp, validator.voting_power));
        }
    }
    weighted_median(times, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{genesis_doc, keys};

    #[test]
    fn test_genesis_state() {
        let genesis = genesis_doc(&keys(4), 10);
        let state = make_genesis_state(&genesis).unwrap();

        assert_eq!(state.next_height(), genesis.initial_height);
        assert_eq!(state.validators.total_voting_power(), 40);
        assert!(state.last_validators.is_empty());
        assert_eq!(state.last_block_time, genesis.genesis_time);
        assert_ne!(
            state.validators.get_proposer(),
            state.next_validators.get_proposer()
        );
    }

    #[test]
    fn test_make_block_fills_header() {
        let keys = keys(4);
        let state = make_genesis_state(&genesis_doc(&keys, 10)).unwrap();
        let proposer = *state.validators.get_proposer().unwrap().address();

        let block = state.make_block(1, vec![b"a=1".to_vec()], Commit::empty(), vec![], proposer);

        assert!(block.validate_basic().is_ok());
        assert_eq!(block.header.time, state.last_block_time);
        assert_eq!(block.header.validators_hash, state.validators.hash());
        assert_eq!(block.header.consensus_hash, state.consensus_params.hash());
        assert_eq!(block.header.proposer_address, proposer);
    }
}
