#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use halcyon_app::{shared, Client, KvStoreApp, LocalClient, SharedApp};
use halcyon_consensus::{
    ConsensusConfig, ConsensusError, ConsensusHandle, ConsensusState, LocalNetwork, Signer,
};
use halcyon_core::{ConsensusParams, GenesisDoc, GenesisValidator, KeyPair};
use halcyon_mempool::{FifoMempool, MempoolConfig};
use halcyon_proxy::{AppConnConsensus, AppConnMempool};
use halcyon_state::{
    make_genesis_state, BlockExecutor, BlockStore, Event, EventBus, MemoryStorage, NopEvidencePool,
    State, StateStore,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const CHAIN_ID: &str = "halcyon-test";

pub fn keys(n: usize) -> Vec<KeyPair> {
    (0..n)
        .map(|i| KeyPair::from_secret_bytes(&[i as u8 + 1; 32]))
        .collect()
}

pub fn genesis(keys: &[KeyPair]) -> GenesisDoc {
    GenesisDoc {
        genesis_time: 1_700_000_000_000,
        chain_id: CHAIN_ID.into(),
        initial_height: 1,
        consensus_params: ConsensusParams::default(),
        validators: keys
            .iter()
            .enumerate()
            .map(|(i, k)| GenesisValidator {
                pub_key: k.public,
                power: 10,
                name: format!("v{}", i),
            })
            .collect(),
        app_hash: vec![],
        app_state: serde_json::Value::Null,
    }
}

pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("halcyon-consensus-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub struct TestNode {
    pub id: String,
    pub key: KeyPair,
    pub app: SharedApp,
    pub mempool: Arc<FifoMempool>,
    pub handle: ConsensusHandle,
    pub events: broadcast::Receiver<Event>,
    pub task: JoinHandle<Result<(), ConsensusError>>,
}

/// Machine for `key` over in-memory stores and a fresh kvstore app.
pub async fn build_node(
    key: &KeyPair,
    state: &State,
    client: Option<Arc<dyn Client>>,
) -> (ConsensusState<MemoryStorage>, ConsensusHandle, SharedApp, Arc<FifoMempool>, EventBus) {
    let app = shared(KvStoreApp::new());
    let consensus_client = client.unwrap_or_else(|| Arc::new(LocalClient::new(app.clone())));
    consensus_client.start().await.unwrap();
    let mempool_client: Arc<dyn Client> = Arc::new(LocalClient::new(app.clone()));
    mempool_client.start().await.unwrap();

    let mempool = Arc::new(FifoMempool::new(
        MempoolConfig::default(),
        AppConnMempool::new(mempool_client),
    ));
    let mut store = StateStore::new(MemoryStorage::new());
    store.save(state).unwrap();
    let bus = EventBus::new(4096);
    let executor = BlockExecutor::new(
        store,
        AppConnConsensus::new(consensus_client),
        mempool.clone(),
        Arc::new(NopEvidencePool),
        bus.clone(),
    );
    let block_store = BlockStore::new(MemoryStorage::new()).unwrap();

    let (cs, handle) = ConsensusState::new(
        ConsensusConfig::test_config(),
        state.clone(),
        executor,
        block_store,
        bus.clone(),
    );
    (cs.with_signer(Signer::new(key.clone())), handle, app, mempool, bus)
}

/// Start one validator per key on a shared in-process network. Keys listed
/// in `offline` are part of the validator set but never run.
pub async fn start_network(keys: &[KeyPair], offline: &[usize]) -> (Arc<LocalNetwork>, Vec<TestNode>) {
    let state = make_genesis_state(&genesis(keys)).unwrap();
    let net = LocalNetwork::new();

    let mut pending = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        if offline.contains(&i) {
            continue;
        }
        let id = format!("node{}", i);
        let (cs, handle, app, mempool, bus) = build_node(key, &state, None).await;
        let gossip = net.join(id.clone(), handle.peer_sender());
        pending.push((id, key.clone(), cs.with_gossip(Arc::new(gossip)), handle, app, mempool, bus));
    }

    let nodes = pending
        .into_iter()
        .map(|(id, key, cs, handle, app, mempool, bus)| TestNode {
            id,
            key,
            app,
            mempool,
            events: bus.subscribe(),
            handle,
            task: tokio::spawn(cs.run()),
        })
        .collect();
    (net, nodes)
}

pub async fn wait_all(nodes: &[TestNode], height: u64) {
    for node in nodes {
        tokio::time::timeout(Duration::from_secs(30), node.handle.wait_for_height(height))
            .await
            .unwrap_or_else(|_| panic!("{} did not reach height {}", node.id, height))
            .unwrap();
    }
}

pub async fn stop_all(nodes: Vec<TestNode>) {
    for node in &nodes {
        node.handle.stop();
    }
    for node in nodes {
        node.task.await.unwrap().unwrap();
    }
}

/// Drain buffered events and return the committed blocks as (height, id).
pub fn committed_blocks(events: &mut broadcast::Receiver<Event>) -> Vec<(u64, halcyon_core::BlockId)> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::NewBlock { block, .. } = event {
            out.push((block.height(), block.block_id()));
        }
    }
    out
}
