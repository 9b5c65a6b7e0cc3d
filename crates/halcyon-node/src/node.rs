use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use halcyon_consensus::{ConsensusError, ConsensusHandle, ConsensusState, FileWal, Handshaker, Signer};
use halcyon_core::{GenesisDoc, KeyPair, Service};
use halcyon_mempool::FifoMempool;
use halcyon_proxy::{default_client_creator, exit_on_fatal, AppConns, ClientCreator, RemoteClientCreator};
use halcyon_state::{BlockExecutor, BlockStore, EventBus, FileStorage, MemoryEvidencePool, StateStore};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::NodeConfig;

const STATE_DB: &str = "state.db";
const BLOCKS_DB: &str = "blocks.db";
const SIGNER_STATE: &str = "signer_state.json";
const EVENT_BUS_CAPACITY: usize = 1024;

/// The Halcyon node
pub struct Node {
    config: NodeConfig,
    genesis: GenesisDoc,
    validator_keypair: Option<KeyPair>,
}

/// A started node: the consensus task and the connections it drives.
pub struct RunningNode {
    handle: ConsensusHandle,
    task: JoinHandle<Result<(), ConsensusError>>,
    conns: AppConns,
    mempool: Arc<FifoMempool>,
}

impl Node {
    /// Create a new node from configuration
    pub fn new(config: NodeConfig) -> Result<Self> {
        let genesis = config.genesis_doc()?;
        let validator_keypair = config.validator_keypair()?;

        match &validator_keypair {
            Some(key) if genesis.validators.iter().any(|v| v.pub_key == key.public) => {
                info!("Running as validator {}", key.public.to_hex());
            }
            Some(key) => {
                warn!(
                    "Key {} is not in the genesis validator set; it signs only once the app adds it",
                    key.public.to_hex()
                );
            }
            None => info!("No validator key configured, following the chain only"),
        }

        Ok(Node {
            config,
            genesis,
            validator_keypair,
        })
    }

    fn client_creator(&self) -> Box<dyn ClientCreator> {
        match self.config.proxy_app.as_str() {
            "kvstore" | "noop" => default_client_creator(&self.config.proxy_app, self.config.transport),
            addr => Box::new(RemoteClientCreator::new(
                addr,
                self.config.transport,
                self.config.must_connect,
            )),
        }
    }

    /// Connect to the application, bring it level with the stores and start
    /// the consensus machine.
    pub async fn start(self) -> Result<RunningNode> {
        let data_dir = &self.config.data_dir;
        std::fs::create_dir_all(data_dir)?;
        info!(
            chain_id = %self.config.chain_id(),
            proxy_app = %self.config.proxy_app,
            "Starting node in {:?}",
            data_dir
        );

        let conns = AppConns::new(self.client_creator().as_ref(), exit_on_fatal())?;
        conns.start().await?;

        let store = StateStore::new(FileStorage::open(data_dir.join(STATE_DB))?);
        let state = store.load_or_genesis(&self.genesis)?;
        let block_store = BlockStore::new(FileStorage::open(data_dir.join(BLOCKS_DB))?)?;
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

        let (state, store) = Handshaker::new(store, state, &block_store, &self.genesis, event_bus.clone())
            .handshake(&conns)
            .await?;
        info!(
            height = state.last_block_height,
            app_hash = %hex::encode_upper(&state.app_hash),
            "State loaded"
        );

        let mempool = Arc::new(FifoMempool::new(self.config.mempool.clone(), conns.mempool()));
        let evidence_pool = Arc::new(MemoryEvidencePool::new(&state));
        let executor = BlockExecutor::new(
            store,
            conns.consensus(),
            mempool.clone(),
            evidence_pool,
            event_bus.clone(),
        );

        let wal = FileWal::open(self.config.wal_path())?.with_limits(
            self.config.consensus.wal_segment_size,
            self.config.consensus.wal_max_segments,
        );
        let (consensus, handle) = ConsensusState::new(
            self.config.consensus.clone(),
            state,
            executor,
            block_store,
            event_bus,
        );
        let mut consensus = consensus.with_wal(Box::new(wal));
        if let Some(key) = self.validator_keypair {
            let signer = Signer::load_or_create(key, data_dir.join(SIGNER_STATE))?;
            consensus = consensus.with_signer(signer);
        }

        Ok(RunningNode {
            handle,
            task: tokio::spawn(consensus.run()),
            conns,
            mempool,
        })
    }

    /// Run until Ctrl-C or until consensus halts on a fatal error. `txs`
    /// are offered to the mempool once the node is up.
    pub async fn run(self, txs: Vec<Vec<u8>>) -> Result<()> {
        let running = self.start().await?;

        for tx in txs {
            match running.mempool().check_tx(tx).await {
                Ok(res) if res.code == 0 => info!("Transaction accepted into the mempool"),
                Ok(res) => warn!(code = res.code, "Transaction rejected by the app: {}", res.log),
                Err(e) => warn!("Transaction rejected: {}", e),
            }
        }

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Received shutdown signal");
            }
            _ = running.handle().stopped() => {
                error!("Consensus halted");
            }
        }

        running.shutdown().await?;
        info!("Node stopped");
        Ok(())
    }
}

impl RunningNode {
    pub fn handle(&self) -> &ConsensusHandle {
        &self.handle
    }

    pub fn mempool(&self) -> Arc<FifoMempool> {
        self.mempool.clone()
    }

    /// Stop consensus, then the application connections.
    pub async fn shutdown(self) -> Result<()> {
        self.handle.stop();
        let result = self.task.await?;
        self.conns.stop().await?;
        result?;
        Ok(())
    }
}

/// What `show-state` prints about a node's stores.
#[derive(Debug, Serialize)]
pub struct StoredState {
    pub chain_id: String,
    pub last_block_height: u64,
    pub last_block_id: String,
    pub last_block_time: u64,
    pub app_hash: String,
    pub last_results_hash: String,
    pub validators: Vec<StoredValidator>,
    pub block_store_base: u64,
    pub block_store_height: u64,
}

#[derive(Debug, Serialize)]
pub struct StoredValidator {
    pub address: String,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

/// Read the saved state of a node that is not running. `None` if the node
/// never saved one.
pub fn load_stored_state(data_dir: &Path) -> Result<Option<StoredState>> {
    let store = StateStore::new(FileStorage::open(data_dir.join(STATE_DB))?);
    let Some(state) = store.load()? else {
        return Ok(None);
    };
    let block_store = BlockStore::new(FileStorage::open(data_dir.join(BLOCKS_DB))?)?;

    Ok(Some(StoredState {
        chain_id: state.chain_id.clone(),
        last_block_height: state.last_block_height,
        last_block_id: state.last_block_id.to_string(),
        last_block_time: state.last_block_time,
        app_hash: hex::encode_upper(&state.app_hash),
        last_results_hash: state.last_results_hash.to_hex(),
        validators: state
            .validators
            .validators()
            .iter()
            .map(|v| StoredValidator {
                address: v.address().to_hex(),
                voting_power: v.voting_power,
                proposer_priority: v.proposer_priority,
            })
            .collect(),
        block_store_base: block_store.base(),
        block_store_height: block_store.height(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::generate_sample_config;

    fn test_config(name: &str) -> NodeConfig {
        let dir = std::env::temp_dir().join(format!("halcyon-node-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut config = generate_sample_config("node-test");
        config.data_dir = dir;
        config.consensus = halcyon_consensus::ConsensusConfig::test_config();
        config
    }

    async fn run_to(node: &RunningNode, height: u64) {
        tokio::time::timeout(Duration::from_secs(20), node.handle().wait_for_height(height))
            .await
            .expect("height not reached in time")
            .unwrap();
    }

    #[test]
    fn test_node_creation() {
        let config = test_config("create");
        assert!(Node::new(config).is_ok());
    }

    #[test]
    fn test_node_rejects_bad_key() {
        let mut config = test_config("bad-key");
        config.validator_key = Some("zz".to_string());
        assert!(Node::new(config).is_err());
    }

    #[test]
    fn test_stored_state_missing() {
        let config = test_config("empty");
        std::fs::create_dir_all(&config.data_dir).unwrap();
        assert!(load_stored_state(&config.data_dir).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&config.data_dir);
    }

    #[tokio::test]
    async fn test_node_commits_and_restarts() {
        let config = test_config("run");
        let data_dir = config.data_dir.clone();

        let node = Node::new(config.clone())
            .unwrap()
            .start()
            .await
            .unwrap();
        node.mempool().check_tx(b"color=blue".to_vec()).await.unwrap();
        run_to(&node, 3).await;
        node.shutdown().await.unwrap();

        let stored = load_stored_state(&data_dir).unwrap().unwrap();
        assert_eq!(stored.chain_id, "node-test");
        assert!(stored.last_block_height >= 3);
        assert_eq!(stored.block_store_height, stored.last_block_height);
        assert_eq!(stored.validators.len(), 1);

        // The in-process app starts empty again; the handshake replays the
        // stored blocks into it before consensus continues.
        let node = Node::new(config)
            .unwrap()
            .start()
            .await
            .unwrap();
        assert!(node.handle().round_state().last_block_height >= stored.last_block_height);
        run_to(&node, stored.last_block_height + 2).await;
        node.shutdown().await.unwrap();
        let _ = std::fs::remove_dir_all(&data_dir);
    }
}
