//! Startup handshake between the stored chain and the application.
//!
//! The application may be behind the block store after a crash, or brand
//! new. The handshake asks it where it is and replays the stored blocks it
//! has not committed, so consensus starts with both agreeing on the app
//! hash of the last block.

use std::sync::Arc;

use halcyon_app::{
    shared, Application, LocalClient, RequestBeginBlock, RequestDeliverTx, RequestEndBlock, RequestInfo,
    RequestInitChain, ResponseBeginBlock, ResponseCommit, ResponseDeliverTx, ResponseEndBlock, ValidatorUpdate,
};
use halcyon_core::{hash_from_byte_slices, GenesisDoc, ValidatorSet, BLOCK_PROTOCOL};
use halcyon_proxy::{AppConnConsensus, AppConns};
use halcyon_state::{
    exec_commit_block, validate_validator_updates, AbciResponses, BlockExecutor, BlockStore, EventBus, ExecError,
    NopEvidencePool, NopMempool, State, StateStore, Storage,
};
use tracing::{info, warn};

use crate::error::ConsensusError;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Handshaker<'a, S: Storage> {
    /// Lent to a block executor while a stored block is applied.
    store: Option<StateStore<S>>,
    initial_state: State,
    block_store: &'a BlockStore<S>,
    genesis: &'a GenesisDoc,
    event_bus: EventBus,
    blocks_replayed: u64,
}

impl<'a, S: Storage> Handshaker<'a, S> {
    pub fn new(
        store: StateStore<S>,
        state: State,
        block_store: &'a BlockStore<S>,
        genesis: &'a GenesisDoc,
        event_bus: EventBus,
    ) -> Self {
        Handshaker {
            store: Some(store),
            initial_state: state,
            block_store,
            genesis,
            event_bus,
            blocks_replayed: 0,
        }
    }

    /// Bring the application level with the stores. Returns the state to
    /// start consensus from and the state store for the block executor.
    pub async fn handshake(mut self, conns: &AppConns) -> Result<(State, StateStore<S>), ConsensusError> {
        let res = conns
            .query()
            .info(RequestInfo {
                version: ENGINE_VERSION.to_string(),
                block_version: BLOCK_PROTOCOL,
            })
            .await?;

        let app_height = res.last_block_height;
        let app_hash = res.last_block_app_hash;
        info!(
            app_height,
            app_hash = %hex::encode_upper(&app_hash),
            software_version = %res.version,
            protocol_version = res.app_version,
            "ABCI handshake App Info"
        );

        let mut state = self.initial_state.clone();
        if state.last_block_height == 0 {
            state.version.app = res.app_version;
        }

        let state = self.replay_blocks(state, app_hash, app_height, conns).await?;
        info!(
            app_height,
            blocks_replayed = self.blocks_replayed,
            "completed ABCI handshake, app and store are synced"
        );
        let store = self.take_store()?;
        Ok((state, store))
    }

    fn take_store(&mut self) -> Result<StateStore<S>, ConsensusError> {
        self.store
            .take()
            .ok_or_else(|| ConsensusError::Handshake("state store already taken".into()))
    }

    fn state_store(&mut self) -> Result<&mut StateStore<S>, ConsensusError> {
        self.store
            .as_mut()
            .ok_or_else(|| ConsensusError::Handshake("state store already taken".into()))
    }

    async fn replay_blocks(
        &mut self,
        mut state: State,
        mut app_hash: Vec<u8>,
        app_height: u64,
        conns: &AppConns,
    ) -> Result<State, ConsensusError> {
        let store_base = self.block_store.base();
        let store_height = self.block_store.height();
        let state_height = state.last_block_height;
        info!(app_height, store_height, state_height, "ABCI replay blocks");

        if app_height == 0 {
            app_hash = self.init_chain(&mut state, conns).await?;
        }

        if app_height > store_height {
            return Err(ConsensusError::Handshake(format!(
                "app block height {} is higher than store {}",
                app_height, store_height
            )));
        }
        if store_height < state_height {
            return Err(ConsensusError::Handshake(format!(
                "state height {} is higher than store {}",
                state_height, store_height
            )));
        }
        if store_height > state_height + 1 {
            return Err(ConsensusError::Handshake(format!(
                "store height {} is more than one above state {}",
                store_height, state_height
            )));
        }
        if app_height > 0 && store_base > 0 && app_height + 1 < store_base {
            return Err(ConsensusError::Handshake(format!(
                "app is at height {} but the store has pruned below {}",
                app_height, store_base
            )));
        }

        // Nothing stored: consensus starts from genesis or the state sync
        // snapshot the app already holds.
        if store_height == 0 {
            self.check_app_hash(&state, &app_hash)?;
            return Ok(state);
        }

        let consensus = conns.consensus();
        if store_height == state_height {
            // The state is saved for the last block; only the app may lag.
            if app_height < store_height {
                let app_hash = self
                    .replay_on_app(&state, &consensus, app_height, store_height)
                    .await?;
                self.check_app_hash(&state, &app_hash)?;
            } else {
                self.check_app_hash(&state, &app_hash)?;
            }
            return Ok(state);
        }

        // The last block is stored but the state was not saved for it.
        if app_height < state_height {
            self.replay_on_app(&state, &consensus, app_height, state_height)
                .await?;
            state = self.apply_stored_block(state, store_height, consensus).await?;
        } else if app_height == state_height {
            state = self.apply_stored_block(state, store_height, consensus).await?;
        } else {
            // The app committed the last block; rebuild the state from its
            // saved responses without running the block again.
            info!(height = store_height, "replay last block using saved ABCI responses");
            let responses = self.state_store()?.load_abci_responses(store_height)?;
            let mock = AppConnConsensus::new(Arc::new(LocalClient::new(shared(ReplayApp::new(
                responses,
                app_hash.clone(),
            )))));
            state = self.apply_stored_block(state, store_height, mock).await?;
        }
        Ok(state)
    }

    async fn init_chain(&mut self, state: &mut State, conns: &AppConns) -> Result<Vec<u8>, ConsensusError> {
        let validators = self
            .genesis
            .validators
            .iter()
            .map(|v| ValidatorUpdate::ed25519(&v.pub_key, v.power))
            .collect();
        let app_state_bytes = serde_json::to_vec(&self.genesis.app_state)
            .map_err(|e| ConsensusError::Handshake(format!("encoding app state: {}", e)))?;
        let res = conns
            .consensus()
            .init_chain(RequestInitChain {
                time: self.genesis.genesis_time,
                chain_id: self.genesis.chain_id.clone(),
                consensus_params: Some(self.genesis.consensus_params.clone()),
                validators,
                app_state_bytes,
                initial_height: self.genesis.initial_height,
            })
            .await?;
        info!(
            validators = res.validators.len(),
            params = res.consensus_params.is_some(),
            "application accepted InitChain"
        );

        // Only a fresh state takes what the app returned.
        if state.last_block_height == 0 {
            if !res.app_hash.is_empty() {
                state.app_hash = res.app_hash.clone();
            }
            if !res.validators.is_empty() {
                let validators =
                    validate_validator_updates(&res.validators, &state.consensus_params.validator)?;
                let set = ValidatorSet::new(validators).map_err(ExecError::from)?;
                state.next_validators = set.copy_increment_proposer_priority(1);
                state.validators = set;
            } else if self.genesis.validators.is_empty() {
                return Err(ConsensusError::Handshake(
                    "validator set is empty in genesis and after InitChain".into(),
                ));
            }
            if let Some(update) = &res.consensus_params {
                state.consensus_params = state.consensus_params.update(update);
                state.version.app = state.consensus_params.version.app_version;
            }
            state.last_results_hash = hash_from_byte_slices::<&[u8]>(&[]);
            self.state_store()?.save(state)?;
        }
        Ok(res.app_hash)
    }

    /// Execute and commit blocks `app_height + 1 ..= to` on the app alone.
    /// Returns the app hash after the last one.
    async fn replay_on_app(
        &mut self,
        state: &State,
        proxy: &AppConnConsensus,
        app_height: u64,
        to: u64,
    ) -> Result<Vec<u8>, ConsensusError> {
        let first = if app_height == 0 {
            state.initial_height
        } else {
            app_height + 1
        };
        let mut app_hash = Vec::new();
        for height in first..=to {
            info!(height, "applying block to app");
            let block = self
                .block_store
                .load_block(height)?
                .ok_or_else(|| ConsensusError::Handshake(format!("block {} missing from store", height)))?;
            let last_validators = if height > state.initial_height {
                self.state_store()?.load_validators(height - 1)?
            } else {
                ValidatorSet::default()
            };
            app_hash = exec_commit_block(proxy, &block, &last_validators, state.initial_height).await?;

            // The next stored header records the hash the network agreed on.
            if let Some(next) = self.block_store.load_block(height + 1)? {
                if next.header.app_hash != app_hash {
                    return Err(ConsensusError::AppHashMismatch {
                        height,
                        expected: hex::encode_upper(&next.header.app_hash),
                        got: hex::encode_upper(&app_hash),
                    });
                }
            }
            self.blocks_replayed += 1;
        }
        Ok(app_hash)
    }

    /// Apply the stored block at `height` through a block executor so the
    /// state and its history are saved like a live commit.
    async fn apply_stored_block(
        &mut self,
        state: State,
        height: u64,
        proxy: AppConnConsensus,
    ) -> Result<State, ConsensusError> {
        let block = self
            .block_store
            .load_block(height)?
            .ok_or_else(|| ConsensusError::Handshake(format!("block {} missing from store", height)))?;
        let block_id = block.block_id();

        let store = self.take_store()?;
        let mut executor = BlockExecutor::new(
            store,
            proxy,
            Arc::new(NopMempool::new()),
            Arc::new(NopEvidencePool),
            self.event_bus.clone(),
        );
        let result = executor.apply_block(&state, block_id, &block).await;
        self.store = Some(executor.into_store());
        let (new_state, _) = result?;
        self.blocks_replayed += 1;
        Ok(new_state)
    }

    fn check_app_hash(&self, state: &State, app_hash: &[u8]) -> Result<(), ConsensusError> {
        if state.app_hash != app_hash {
            warn!(height = state.last_block_height, "app hash differs from state");
            return Err(ConsensusError::AppHashMismatch {
                height: state.last_block_height,
                expected: hex::encode_upper(&state.app_hash),
                got: hex::encode_upper(app_hash),
            });
        }
        Ok(())
    }
}

/// Answers a block's requests from saved responses. Stands in for an
/// application that already committed the block.
struct ReplayApp {
    responses: AbciResponses,
    app_hash: Vec<u8>,
    tx_count: usize,
}

impl ReplayApp {
    fn new(responses: AbciResponses, app_hash: Vec<u8>) -> Self {
        ReplayApp {
            responses,
            app_hash,
            tx_count: 0,
        }
    }
}

impl Application for ReplayApp {
    fn begin_block(&mut self, _req: RequestBeginBlock) -> ResponseBeginBlock {
        self.tx_count = 0;
        self.responses.begin_block.clone()
    }

    fn deliver_tx(&mut self, _req: RequestDeliverTx) -> ResponseDeliverTx {
        let res = self
            .responses
            .deliver_txs
            .get(self.tx_count)
            .cloned()
            .unwrap_or_default();
        self.tx_count += 1;
        res
    }

    fn end_block(&mut self, _req: RequestEndBlock) -> ResponseEndBlock {
        self.responses.end_block.clone()
    }

    fn commit(&mut self) -> ResponseCommit {
        ResponseCommit {
            data: self.app_hash.clone(),
            retain_height: 0,
        }
    }
}
