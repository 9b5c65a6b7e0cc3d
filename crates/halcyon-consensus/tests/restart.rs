mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use halcyon_app::{shared, ClientError, KvStoreApp, SharedApp};
use halcyon_consensus::{
    ConsensusConfig, ConsensusError, ConsensusHandle, ConsensusState, FileWal, Handshaker, Signer, Wal,
};
use halcyon_core::{GenesisDoc, KeyPair, Service};
use halcyon_proxy::{AppConns, FatalHandler, LocalClientCreator};
use halcyon_state::{
    BlockExecutor, BlockStore, EventBus, FileStorage, NopEvidencePool, NopMempool, StateStore,
};
use tokio::task::JoinHandle;

use common::{genesis, keys, temp_dir};

/// A single validator node over file stores in `dir`, after the handshake
/// with `app`.
async fn start_node(
    dir: &Path,
    key: &KeyPair,
    genesis: &GenesisDoc,
    app: SharedApp,
) -> (ConsensusHandle, JoinHandle<Result<(), ConsensusError>>, AppConns) {
    let fatal: FatalHandler = Arc::new(|_: &'static str, _: &ClientError| {});
    let conns = AppConns::new(&LocalClientCreator::new(app), fatal).unwrap();
    conns.start().await.unwrap();

    let store = StateStore::new(FileStorage::open(dir.join("state.db")).unwrap());
    let state = store.load_or_genesis(genesis).unwrap();
    let block_store = BlockStore::new(FileStorage::open(dir.join("blocks.db")).unwrap()).unwrap();
    let bus = EventBus::new(256);

    let (state, store) = Handshaker::new(store, state, &block_store, genesis, bus.clone())
        .handshake(&conns)
        .await
        .unwrap();

    let executor = BlockExecutor::new(
        store,
        conns.consensus(),
        Arc::new(NopMempool::new()),
        Arc::new(NopEvidencePool),
        bus.clone(),
    );
    let signer = Signer::load_or_create(key.clone(), dir.join("signer_state.json")).unwrap();
    let wal = FileWal::open(dir.join("cs.wal")).unwrap();
    let (cs, handle) = ConsensusState::new(ConsensusConfig::test_config(), state, executor, block_store, bus);
    let cs = cs.with_signer(signer).with_wal(Box::new(wal));
    (handle, tokio::spawn(cs.run()), conns)
}

async fn run_to(handle: &ConsensusHandle, height: u64) {
    tokio::time::timeout(Duration::from_secs(20), handle.wait_for_height(height))
        .await
        .expect("height not reached in time")
        .unwrap();
}

#[tokio::test]
async fn test_restart_resumes_after_last_height() {
    let dir = temp_dir("restart");
    let keys = keys(1);
    let genesis = genesis(&keys);
    let app = shared(KvStoreApp::new());

    let (handle, task, conns) = start_node(&dir, &keys[0], &genesis, app.clone()).await;
    run_to(&handle, 3).await;
    handle.stop();
    task.await.unwrap().unwrap();
    conns.stop().await.unwrap();

    let stopped_at = app.lock().await.info(Default::default()).last_block_height;
    assert!(stopped_at >= 3);
    let wal = FileWal::open(dir.join("cs.wal")).unwrap();
    assert!(wal.search_for_end_height(stopped_at).unwrap().is_some());
    drop(wal);

    let (handle, task, _conns) = start_node(&dir, &keys[0], &genesis, app.clone()).await;
    assert!(handle.round_state().last_block_height >= stopped_at);
    run_to(&handle, stopped_at + 2).await;
    handle.stop();
    task.await.unwrap().unwrap();

    let signer = Signer::load_or_create(keys[0].clone(), dir.join("signer_state.json")).unwrap();
    assert!(signer.last_sign_state().height > stopped_at);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_handshake_replays_blocks_into_fresh_app() {
    let dir = temp_dir("replay-app");
    let keys = keys(1);
    let genesis = genesis(&keys);

    let first_app = shared(KvStoreApp::new());
    let (handle, task, conns) = start_node(&dir, &keys[0], &genesis, first_app.clone()).await;
    run_to(&handle, 3).await;
    handle.stop();
    task.await.unwrap().unwrap();
    conns.stop().await.unwrap();
    let first = first_app.lock().await.info(Default::default());

    // The application lost everything; the stored blocks bring it back.
    let fresh_app = shared(KvStoreApp::new());
    let (handle, task, _conns) = start_node(&dir, &keys[0], &genesis, fresh_app.clone()).await;
    let replayed = fresh_app.lock().await.info(Default::default());
    assert!(replayed.last_block_height >= first.last_block_height);
    if replayed.last_block_height == first.last_block_height {
        assert_eq!(replayed.last_block_app_hash, first.last_block_app_hash);
    }

    run_to(&handle, first.last_block_height + 1).await;
    handle.stop();
    task.await.unwrap().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
