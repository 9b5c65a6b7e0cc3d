use halcyon_app::{ResponseBeginBlock, ResponseDeliverTx, ResponseEndBlock};
use halcyon_core::{ConsensusParams, GenesisDoc, ValidatorSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateError;
use crate::state::{make_genesis_state, State};
use crate::storage::{load, stage, Storage};

/// Full validator sets are written at change heights and at every multiple
/// of this interval; other heights point back to the last change.
pub const VAL_SET_CHECKPOINT_INTERVAL: u64 = 100_000;

const STATE_KEY: &str = "state";

fn validators_key(height: u64) -> String {
    format!("validators:{}", height)
}

fn consensus_params_key(height: u64) -> String {
    format!("consensus_params:{}", height)
}

fn abci_responses_key(height: u64) -> String {
    format!("abci_responses:{}", height)
}

/// Everything the application answered while executing one block. Kept to
/// rebuild the state when a crash lands between the app's Commit and the
/// state save.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbciResponses {
    pub begin_block: ResponseBeginBlock,
    pub deliver_txs: Vec<ResponseDeliverTx>,
    pub end_block: ResponseEndBlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ValidatorsInfo {
    validator_set: Option<ValidatorSet>,
    last_height_changed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsensusParamsInfo {
    consensus_params: Option<ConsensusParams>,
    last_height_changed: u64,
}

/// Persists `State` and the per-height history needed to validate blocks
/// and serve light verification: validator sets, consensus params and the
/// application's responses.
pub struct StateStore<S: Storage> {
    storage: S,
}

impl<S: Storage> StateStore<S> {
    pub fn new(storage: S) -> Self {
        StateStore { storage }
    }

    pub fn load(&self) -> Result<Option<State>, StateError> {
        load(&self.storage, STATE_KEY)
    }

    /// The stored state, or the genesis state if nothing was saved yet.
    pub fn load_or_genesis(&self, genesis: &GenesisDoc) -> Result<State, StateError> {
        match self.load()? {
            Some(state) if !state.is_empty() => Ok(state),
            _ => make_genesis_state(genesis),
        }
    }

    /// Persist `state` together with the validator and params history it
    /// implies for the next heights, in one commit.
    pub fn save(&mut self, state: &State) -> Result<(), StateError> {
        let mut next_height = state.last_block_height + 1;
        if next_height == 1 {
            next_height = state.initial_height;
            // Nothing recorded the validators of the first height yet.
            self.stage_validators_info(next_height, next_height, &state.validators)?;
        }
        self.stage_validators_info(
            next_height + 1,
            state.last_height_validators_changed,
            &state.next_validators,
        )?;
        self.stage_consensus_params_info(
            next_height,
            state.last_height_consensus_params_changed,
            &state.consensus_params,
        )?;
        self.stage_and_commit(STATE_KEY, state)
    }

    /// Seed an empty store with a state that did not come from executing
    /// blocks locally, such as one restored from a snapshot.
    pub fn bootstrap(&mut self, state: &State) -> Result<(), StateError> {
        let height = state.next_height();
        if height > state.initial_height && !state.last_validators.is_empty() {
            self.stage_validators_info(height - 1, height - 1, &state.last_validators)?;
        }
        self.stage_validators_info(height, height, &state.validators)?;
        self.stage_validators_info(height + 1, height + 1, &state.next_validators)?;
        self.stage_consensus_params_info(height, height, &state.consensus_params)?;
        self.stage_and_commit(STATE_KEY, state)
    }

    pub fn load_validators(&self, height: u64) -> Result<ValidatorSet, StateError> {
        let info: ValidatorsInfo =
            load(&self.storage, &validators_key(height))?.ok_or(StateError::NoValidatorSet(height))?;
        if let Some(set) = info.validator_set {
            return Ok(set);
        }

        let checkpoint = last_stored_height_for(height, info.last_height_changed);
        let stored: ValidatorsInfo = load(&self.storage, &validators_key(checkpoint))?
            .ok_or(StateError::NoValidatorSet(checkpoint))?;
        let mut set = stored
            .validator_set
            .ok_or(StateError::NoValidatorSet(checkpoint))?;
        let times = u32::try_from(height - checkpoint).unwrap_or(u32::MAX);
        set.increment_proposer_priority(times);
        Ok(set)
    }

    pub fn load_consensus_params(&self, height: u64) -> Result<ConsensusParams, StateError> {
        let info: ConsensusParamsInfo = load(&self.storage, &consensus_params_key(height))?
            .ok_or(StateError::NoConsensusParams(height))?;
        if let Some(params) = info.consensus_params {
            return Ok(params);
        }
        let changed: ConsensusParamsInfo =
            load(&self.storage, &consensus_params_key(info.last_height_changed))?
                .ok_or(StateError::NoConsensusParams(info.last_height_changed))?;
        changed
            .consensus_params
            .ok_or(StateError::NoConsensusParams(info.last_height_changed))
    }

    pub fn save_abci_responses(&mut self, height: u64, responses: &AbciResponses) -> Result<(), StateError> {
        self.stage_and_commit(&abci_responses_key(height), responses)
    }

    pub fn load_abci_responses(&self, height: u64) -> Result<AbciResponses, StateError> {
        load(&self.storage, &abci_responses_key(height))?.ok_or(StateError::NoAbciResponses(height))
    }

    /// Delete history for heights in `[from, to)`. Entries that later
    /// heights still point at are kept.
    pub fn prune_states(&mut self, from: u64, to: u64) -> Result<(), StateError> {
        if from == 0 || to <= from {
            return Ok(());
        }

        let vals_info: ValidatorsInfo =
            load(&self.storage, &validators_key(to))?.ok_or(StateError::NoValidatorSet(to))?;
        let keep_vals = vals_info
            .validator_set
            .is_none()
            .then(|| last_stored_height_for(to, vals_info.last_height_changed));

        let params_info: ConsensusParamsInfo = load(&self.storage, &consensus_params_key(to))?
            .ok_or(StateError::NoConsensusParams(to))?;
        let keep_params = params_info
            .consensus_params
            .is_none()
            .then_some(params_info.last_height_changed);

        for height in from..to {
            if keep_vals != Some(height) {
                self.storage.delete(validators_key(height).as_bytes());
            }
            if keep_params != Some(height) {
                self.storage.delete(consensus_params_key(height).as_bytes());
            }
            self.storage.delete(abci_responses_key(height).as_bytes());
        }
        self.commit()?;
        debug!(from, to, "pruned state history");
        Ok(())
    }

    fn stage_validators_info(
        &mut self,
        height: u64,
        last_height_changed: u64,
        set: &ValidatorSet,
    ) -> Result<(), StateError> {
        if last_height_changed > height {
            return Err(StateError::BadLastHeightChanged {
                height,
                last_changed: last_height_changed,
            });
        }
        let checkpoint = height % VAL_SET_CHECKPOINT_INTERVAL == 0;
        let info = ValidatorsInfo {
            validator_set: (height == last_height_changed || checkpoint).then(|| set.clone()),
            last_height_changed,
        };
        stage(&mut self.storage, &validators_key(height), &info)
    }

    fn stage_consensus_params_info(
        &mut self,
        height: u64,
        last_height_changed: u64,
        params: &ConsensusParams,
    ) -> Result<(), StateError> {
        let info = ConsensusParamsInfo {
            consensus_params: (height == last_height_changed).then(|| params.clone()),
            last_height_changed,
        };
        stage(&mut self.storage, &consensus_params_key(height), &info)
    }

    fn stage_and_commit<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        if let Err(e) = stage(&mut self.storage, key, value) {
            self.storage.rollback();
            return Err(e);
        }
        self.commit()
    }

    fn commit(&mut self) -> Result<(), StateError> {
        self.storage.commit().inspect_err(|_| self.storage.rollback())
    }
}

/// Height whose entry holds the full set that `height` derives from.
fn last_stored_height_for(height: u64, last_height_changed: u64) -> u64 {
    let checkpoint = height - height % VAL_SET_CHECKPOINT_INTERVAL;
    checkpoint.max(last_height_changed)
}
