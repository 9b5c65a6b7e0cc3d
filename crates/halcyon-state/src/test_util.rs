use halcyon_core::{
    Block, BlockId, Commit, ConsensusParams, GenesisDoc, GenesisValidator, KeyPair, Sig, Vote,
    VoteType,
};

use crate::state::State;

pub(crate) fn keys(n: usize) -> Vec<KeyPair> {
    (0..n)
        .map(|i| KeyPair::from_secret_bytes(&[i as u8 + 1; 32]))
        .collect()
}

pub(crate) fn genesis_doc(keys: &[KeyPair], power: i64) -> GenesisDoc {
    GenesisDoc {
        genesis_time: 1_700_000_000_000,
        chain_id: "halcyon-test".into(),
        initial_height: 1,
        consensus_params: ConsensusParams::default(),
        validators: keys
            .iter()
            .enumerate()
            .map(|(i, k)| GenesisValidator {
                pub_key: k.public,
                power,
                name: format!("v{}", i),
            })
            .collect(),
        app_hash: vec![],
        app_state: serde_json::Value::Null,
    }
}

/// A vote by the validator at `index` of `state.validators`.
pub(crate) fn signed_vote(
    state: &State,
    keys: &[KeyPair],
    index: usize,
    vote_type: VoteType,
    height: u64,
    round: u32,
    block_id: BlockId,
) -> Vote {
    let validator = state.validators.get_by_index(index).unwrap();
    let key = keys.iter().find(|k| k.public == validator.pub_key).unwrap();
    let mut vote = Vote {
        vote_type,
        height,
        round,
        block_id,
        timestamp: state.last_block_time + 1_000 + index as u64,
        validator_address: key.public,
        validator_index: index as u32,
        signature: Sig::default(),
    };
    vote.sign(&state.chain_id, &key.secret);
    vote
}

/// A commit for `block` signed by every validator of `state`.
pub(crate) fn commit_for(state: &State, keys: &[KeyPair], block: &Block, round: u32) -> Commit {
    let signatures = (0..state.validators.len())
        .map(|i| {
            signed_vote(state, keys, i, VoteType::Precommit, block.height(), round, block.block_id())
                .to_commit_sig()
        })
        .collect();
    Commit {
        height: block.height(),
        round,
        block_id: block.block_id(),
        signatures,
    }
}
