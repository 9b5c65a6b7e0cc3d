//! Block execution: validate a decided block, run it through the
//! application, and fold the results into the next consensus state.

use std::sync::Arc;

use halcyon_app::{
    ClientError, LastCommitInfo, Misbehavior, MisbehaviorKind, RequestBeginBlock,
    RequestDeliverTx, RequestEndBlock, ValidatorInfo, ValidatorUpdate, VoteInfo,
};
use halcyon_core::{
    Block, BlockId, Commit, Evidence, Header, PublicKey, ValidatorParams, Validator, ValidatorSet,
};
use halcyon_proxy::AppConnConsensus;
use tracing::{debug, info};

use crate::error::{ExecError, ValidationError};
use crate::events::{Event, EventBus};
use crate::evidence::EvidencePool;
use crate::mempool::Mempool;
use crate::results::AbciResults;
use crate::state::State;
use crate::storage::Storage;
use crate::store::{AbciResponses, StateStore};
use crate::validation;

/// Room left in a block for header and commit overhead, per signature.
const COMMIT_SIG_OVERHEAD: i64 = 112;
const HEADER_OVERHEAD: i64 = 512;

/// Drives the consensus connection through the per-height sequence
/// BeginBlock, DeliverTx*, EndBlock, Commit and persists the outcome.
pub struct BlockExecutor<S: Storage> {
    store: StateStore<S>,
    proxy_app: AppConnConsensus,
    mempool: Arc<dyn Mempool>,
    evidence_pool: Arc<dyn EvidencePool>,
    event_bus: EventBus,
}

impl<S: Storage> BlockExecutor<S> {
    pub fn new(
        store: StateStore<S>,
        proxy_app: AppConnConsensus,
        mempool: Arc<dyn Mempool>,
        evidence_pool: Arc<dyn EvidencePool>,
        event_bus: EventBus,
    ) -> Self {
        BlockExecutor {
            store,
            proxy_app,
            mempool,
            evidence_pool,
            event_bus,
        }
    }

    pub fn store(&self) -> &StateStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StateStore<S> {
        &mut self.store
    }

    pub fn into_store(self) -> StateStore<S> {
        self.store
    }

    pub fn evidence_pool(&self) -> &Arc<dyn EvidencePool> {
        &self.evidence_pool
    }

    /// A block for `height` filled with pending evidence and as many mempool
    /// transactions as the byte and gas limits allow.
    pub async fn create_proposal_block(
        &self,
        height: u64,
        state: &State,
        last_commit: Commit,
        proposer_address: PublicKey,
    ) -> Block {
        let params = &state.consensus_params;
        let evidence = self
            .evidence_pool
            .pending_evidence(params.evidence.max_bytes);

        let max_data_bytes = if params.block.max_bytes < 0 {
            -1
        } else {
            let evidence_bytes: i64 = evidence.iter().map(|ev| ev.bytes().len() as i64).sum();
            let overhead = HEADER_OVERHEAD
                + last_commit.signatures.len() as i64 * COMMIT_SIG_OVERHEAD
                + evidence_bytes;
            (params.block.max_bytes - overhead).max(0)
        };
        let txs = self
            .mempool
            .reap_max_bytes_max_gas(max_data_bytes, params.block.max_gas)
            .await;

        state.make_block(height, txs, last_commit, evidence, proposer_address)
    }

    pub fn validate_block(&self, state: &State, block: &Block) -> Result<(), ValidationError> {
        validation::validate_block(state, block, self.evidence_pool.as_ref())
    }

    /// Validate, execute and commit `block`, returning the next state and
    /// the retain height the application asked for (0 keeps everything).
    ///
    /// Any error other than `InvalidBlock` leaves the node unable to
    /// continue: the application may have seen part of the block.
    pub async fn apply_block(
        &mut self,
        state: &State,
        block_id: BlockId,
        block: &Block,
    ) -> Result<(State, u64), ExecError> {
        self.validate_block(state, block)?;

        let responses = exec_block_on_proxy_app(
            &self.proxy_app,
            block,
            &state.last_validators,
            state.initial_height,
        )
        .await?;

        self.store.save_abci_responses(block.height(), &responses)?;

        let updates = validate_validator_updates(
            &responses.end_block.validator_updates,
            &state.consensus_params.validator,
        )?;
        if !updates.is_empty() {
            info!(height = block.height(), count = updates.len(), "validator updates");
        }

        let mut new_state = update_state(state, block_id, &block.header, &responses, &updates)?;

        let (app_hash, retain_height) = self
            .commit(&new_state, block, &responses)
            .await?;

        self.evidence_pool.update(&new_state, &block.evidence);

        new_state.app_hash = app_hash;
        self.store.save(&new_state)?;

        self.fire_events(block, &responses, updates);
        Ok((new_state, retain_height))
    }

    /// Commit with the mempool locked so no CheckTx runs against the
    /// half-updated application, then let the mempool drop what was
    /// included.
    async fn commit(
        &self,
        state: &State,
        block: &Block,
        responses: &AbciResponses,
    ) -> Result<(Vec<u8>, u64), ExecError> {
        let _lock = self.mempool.lock().await;

        self.mempool.flush_app_conn().await?;
        let res = self.proxy_app.commit().await?;

        info!(
            height = block.height(),
            num_txs = block.data.len(),
            app_hash = %hex_prefix(&res.data),
            "committed state"
        );

        self.mempool
            .update(block.height(), &block.data, &responses.deliver_txs)
            .await?;
        let mempool_size = self.mempool.size().await;
        debug!(height = state.last_block_height, mempool_size, "mempool updated");
        Ok((res.data, res.retain_height))
    }

    /// Execute and commit a stored block without touching the state store,
    /// as replay does. Returns the application hash.
    pub async fn exec_commit_block(&self, block: &Block, initial_height: u64) -> Result<Vec<u8>, ExecError> {
        let last_validators = if block.height() > initial_height {
            self.store.load_validators(block.height() - 1)?
        } else {
            ValidatorSet::default()
        };
        exec_commit_block(&self.proxy_app, block, &last_validators, initial_height).await
    }

    fn fire_events(&self, block: &Block, responses: &AbciResponses, updates: Vec<Validator>) {
        self.event_bus.publish(Event::NewBlock {
            block: Box::new(block.clone()),
            begin_block: responses.begin_block.clone(),
            end_block: responses.end_block.clone(),
        });
        self.event_bus.publish(Event::NewBlockHeader {
            header: Box::new(block.header.clone()),
            num_txs: block.data.len(),
        });
        for evidence in &block.evidence {
            self.event_bus.publish(Event::NewEvidence {
                height: block.height(),
                evidence: evidence.clone(),
            });
        }
        for (index, (tx, result)) in block.data.iter().zip(&responses.deliver_txs).enumerate() {
            self.event_bus.publish(Event::Tx {
                height: block.height(),
                index: index as u32,
                tx: tx.clone(),
                result: result.clone(),
            });
        }
        if !updates.is_empty() {
            self.event_bus.publish(Event::ValidatorSetUpdates { updates });
        }
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Who signed the previous block, weighted by their power then.
fn last_commit_info(block: &Block, last_validators: &ValidatorSet, initial_height: u64) -> LastCommitInfo {
    if block.height() <= initial_height {
        return LastCommitInfo::default();
    }
    let signed = block.last_commit.bit_array();
    let votes = last_validators
        .validators()
        .iter()
        .enumerate()
        .map(|(idx, v)| VoteInfo {
            validator: ValidatorInfo {
                address: v.pub_key,
                power: v.voting_power,
            },
            signed_last_block: signed.get(idx).copied().unwrap_or(false),
        })
        .collect();
    LastCommitInfo {
        round: block.last_commit.round,
        votes,
    }
}

fn misbehavior(evidence: &Evidence) -> Misbehavior {
    let (address, power) = evidence.offender();
    Misbehavior {
        kind: match evidence {
            Evidence::DuplicateVote(_) => MisbehaviorKind::DuplicateVote,
        },
        validator: ValidatorInfo { address, power },
        height: evidence.height(),
        time: evidence.time(),
        total_voting_power: evidence.total_voting_power(),
    }
}

/// Run BeginBlock, every DeliverTx and EndBlock for `block`. Transactions
/// the application rejects are recorded, never fatal.
pub async fn exec_block_on_proxy_app(
    proxy_app: &AppConnConsensus,
    block: &Block,
    last_validators: &ValidatorSet,
    initial_height: u64,
) -> Result<AbciResponses, ClientError> {
    let begin_block = proxy_app
        .begin_block(RequestBeginBlock {
            hash: block.hash(),
            header: block.header.clone(),
            last_commit_info: last_commit_info(block, last_validators, initial_height),
            byzantine_validators: block.evidence.iter().map(misbehavior).collect(),
        })
        .await?;

    let mut deliver_txs = Vec::with_capacity(block.data.len());
    let mut invalid = 0usize;
    for tx in &block.data {
        let res = proxy_app.deliver_tx(RequestDeliverTx { tx: tx.clone() }).await?;
        if !res.is_ok() {
            debug!(code = res.code, log = %res.log, "invalid tx");
            invalid += 1;
        }
        deliver_txs.push(res);
    }

    let end_block = proxy_app
        .end_block(RequestEndBlock {
            height: block.height(),
        })
        .await?;

    info!(
        height = block.height(),
        num_valid_txs = deliver_txs.len() - invalid,
        num_invalid_txs = invalid,
        "executed block"
    );

    Ok(AbciResponses {
        begin_block,
        deliver_txs,
        end_block,
    })
}

/// Execute and commit `block` on the application, returning its hash.
pub async fn exec_commit_block(
    proxy_app: &AppConnConsensus,
    block: &Block,
    last_validators: &ValidatorSet,
    initial_height: u64,
) -> Result<Vec<u8>, ExecError> {
    exec_block_on_proxy_app(proxy_app, block, last_validators, initial_height).await?;
    let res = proxy_app.commit().await?;
    Ok(res.data)
}

/// Turn application validator updates into validator set changes. Power 0
/// removes a validator.
pub fn validate_validator_updates(
    updates: &[ValidatorUpdate],
    params: &ValidatorParams,
) -> Result<Vec<Validator>, ExecError> {
    updates
        .iter()
        .map(|update| {
            if update.power < 0 {
                return Err(ExecError::InvalidValidatorUpdate(format!(
                    "voting power can't be negative: {}",
                    update.power
                )));
            }
            if !params.pub_key_types.iter().any(|t| *t == update.pub_key.key_type) {
                return Err(ExecError::InvalidValidatorUpdate(format!(
                    "key type {} is not allowed",
                    update.pub_key.key_type
                )));
            }
            let pub_key = update.pub_key.to_public_key().ok_or_else(|| {
                ExecError::InvalidValidatorUpdate("malformed public key".into())
            })?;
            Ok(Validator::new(pub_key, update.power))
        })
        .collect()
}

/// The state after `header`'s block, before its app hash is known.
/// Validator changes land in the set for two heights later.
pub fn update_state(
    state: &State,
    block_id: BlockId,
    header: &Header,
    responses: &AbciResponses,
    validator_updates: &[Validator],
) -> Result<State, ExecError> {
    let mut next_validators = state.next_validators.clone();
    let mut last_height_validators_changed = state.last_height_validators_changed;
    if !validator_updates.is_empty() {
        next_validators.update_with_change_set(validator_updates)?;
        last_height_validators_changed = header.height + 2;
    }
    next_validators.increment_proposer_priority(1);

    let mut consensus_params = state.consensus_params.clone();
    let mut last_height_consensus_params_changed = state.last_height_consensus_params_changed;
    let mut version = state.version;
    if let Some(update) = &responses.end_block.consensus_param_updates {
        if !update.is_empty() {
            consensus_params = state.consensus_params.update(update);
            consensus_params
                .validate()
                .map_err(|e| ExecError::InvalidParams(e.to_string()))?;
            version.app = consensus_params.version.app_version;
            last_height_consensus_params_changed = header.height + 1;
        }
    }

    Ok(State {
        version,
        chain_id: state.chain_id.clone(),
        initial_height: state.initial_height,
        last_block_height: header.height,
        last_block_id: block_id,
        last_block_time: header.time,
        next_validators,
        validators: state.next_validators.clone(),
        last_validators: state.validators.clone(),
        last_height_validators_changed,
        consensus_params,
        last_height_consensus_params_changed,
        last_results_hash: AbciResults::new(&responses.deliver_txs).hash(),
        app_hash: Vec::new(),
    })
}
