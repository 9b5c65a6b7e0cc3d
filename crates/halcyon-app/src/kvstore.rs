//! Example key/value application.
//!
//! Transactions are `key=value` pairs, or `val:<hex pubkey>!<power>` to change
//! the validator set. The app hash commits to the whole store, snapshots are
//! taken every `snapshot_interval` heights, and Commit asks the engine to
//! retain only the last `retain_blocks` blocks.

use std::collections::BTreeMap;

use halcyon_core::{hash_blake3, PublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::Application;
use crate::types::*;

pub const VALIDATOR_TX_PREFIX: &str = "val:";
pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Clone)]
pub struct KvStoreConfig {
    /// Take a snapshot every this many heights; 0 disables snapshots
    pub snapshot_interval: u64,
    /// Number of recent blocks to keep; 0 keeps everything
    pub retain_blocks: u64,
    pub snapshot_chunk_size: usize,
    /// Snapshots kept in memory
    pub max_snapshots: usize,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        KvStoreConfig {
            snapshot_interval: 0,
            retain_blocks: 0,
            snapshot_chunk_size: 64 * 1024,
            max_snapshots: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreState {
    height: u64,
    data: BTreeMap<String, String>,
    validators: BTreeMap<PublicKey, i64>,
}

impl StoreState {
    fn hash(&self) -> Vec<u8> {
        if self.data.is_empty() && self.validators.is_empty() {
            return Vec::new();
        }
        let mut bytes = Vec::new();
        for (key, value) in &self.data {
            put_field(&mut bytes, key.as_bytes());
            put_field(&mut bytes, value.as_bytes());
        }
        for (key, power) in &self.validators {
            put_field(&mut bytes, key.as_bytes());
            bytes.extend_from_slice(&power.to_be_bytes());
        }
        hash_blake3(&bytes).to_vec()
    }
}

/// Length-prefixed so that distinct stores never encode alike.
fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u64).to_be_bytes());
    out.extend_from_slice(field);
}

enum Tx {
    Set(String, String),
    Validator(PublicKey, i64),
}

fn parse_tx(tx: &[u8]) -> Result<Tx, String> {
    let s = std::str::from_utf8(tx).map_err(|_| "tx is not utf-8".to_string())?;
    if let Some(rest) = s.strip_prefix(VALIDATOR_TX_PREFIX) {
        let (key, power) = rest
            .split_once('!')
            .ok_or_else(|| format!("expected val:<pubkey>!<power>, got {:?}", s))?;
        let key = PublicKey::from_hex(key).map_err(|e| format!("bad pubkey: {}", e))?;
        let power: i64 = power.parse().map_err(|_| format!("bad power {:?}", power))?;
        if power < 0 {
            return Err(format!("negative power {}", power));
        }
        return Ok(Tx::Validator(key, power));
    }
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid tx format: {:?}", s))?;
    if key.is_empty() {
        return Err("key cannot be empty".into());
    }
    Ok(Tx::Set(key.to_string(), value.to_string()))
}

struct StoredSnapshot {
    snapshot: Snapshot,
    chunks: Vec<Vec<u8>>,
}

pub struct KvStoreApp {
    config: KvStoreConfig,
    state: StoreState,
    app_hash: Vec<u8>,
    pending_updates: Vec<ValidatorUpdate>,
    snapshots: Vec<StoredSnapshot>,
    restore: Option<(Snapshot, Vec<Vec<u8>>)>,
}

impl Default for KvStoreApp {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStoreApp {
    pub fn new() -> Self {
        Self::with_config(KvStoreConfig::default())
    }

    pub fn with_config(config: KvStoreConfig) -> Self {
        KvStoreApp {
            config,
            state: StoreState::default(),
            app_hash: Vec::new(),
            pending_updates: Vec::new(),
            snapshots: Vec::new(),
            restore: None,
        }
    }

    pub fn height(&self) -> u64 {
        self.state.height
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.state.data.get(key).map(String::as_str)
    }

    fn take_snapshot(&mut self) {
        let bytes = match bincode::serialize(&self.state) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(height = self.state.height, error = %e, "skipping snapshot");
                return;
            }
        };
        let chunk_size = self.config.snapshot_chunk_size.max(1);
        let chunks: Vec<Vec<u8>> = bytes.chunks(chunk_size).map(<[u8]>::to_vec).collect();
        let snapshot = Snapshot {
            height: self.state.height,
            format: SNAPSHOT_FORMAT,
            chunks: chunks.len() as u32,
            hash: hash_blake3(&bytes).to_vec(),
            metadata: Vec::new(),
        };
        info!("Created snapshot at height {}", snapshot.height);
        self.snapshots.push(StoredSnapshot { snapshot, chunks });
        if self.snapshots.len() > self.config.max_snapshots {
            self.snapshots.remove(0);
        }
    }
}

impl Application for KvStoreApp {
    fn info(&mut self, _req: RequestInfo) -> ResponseInfo {
        ResponseInfo {
            data: format!("{{\"size\":{}}}", self.state.data.len()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            app_version: 1,
            last_block_height: self.state.height,
            last_block_app_hash: self.app_hash.clone(),
        }
    }

    fn init_chain(&mut self, req: RequestInitChain) -> ResponseInitChain {
        if !req.app_state_bytes.is_empty() {
            if let Ok(data) = serde_json::from_slice::<BTreeMap<String, String>>(&req.app_state_bytes) {
                self.state.data = data;
            }
        }
        for update in &req.validators {
            if let Some(key) = update.pub_key.to_public_key() {
                self.state.validators.insert(key, update.power);
            }
        }
        self.app_hash = self.state.hash();
        ResponseInitChain {
            consensus_params: None,
            validators: Vec::new(),
            app_hash: self.app_hash.clone(),
        }
    }

    fn query(&mut self, req: RequestQuery) -> ResponseQuery {
        let key = String::from_utf8_lossy(&req.data).to_string();
        match self.state.data.get(&key) {
            Some(value) => ResponseQuery {
                log: "exists".into(),
                key: req.data,
                value: value.as_bytes().to_vec(),
                height: self.state.height,
                ..Default::default()
            },
            None => ResponseQuery {
                log: "does not exist".into(),
                key: req.data,
                height: self.state.height,
                ..Default::default()
            },
        }
    }

    fn check_tx(&mut self, req: RequestCheckTx) -> ResponseCheckTx {
        match parse_tx(&req.tx) {
            Ok(_) => ResponseCheckTx {
                code: CODE_TYPE_OK,
                gas_wanted: 1,
                ..Default::default()
            },
            Err(log) => ResponseCheckTx {
                code: CODE_TYPE_ENCODING_ERROR,
                log,
                ..Default::default()
            },
        }
    }

    fn deliver_tx(&mut self, req: RequestDeliverTx) -> ResponseDeliverTx {
        match parse_tx(&req.tx) {
            Ok(Tx::Set(key, value)) => {
                debug!("kvstore set {}={}", key, value);
                let attributes = vec![EventAttribute {
                    key: "key".into(),
                    value: key.clone(),
                    index: true,
                }];
                self.state.data.insert(key, value);
                ResponseDeliverTx {
                    code: CODE_TYPE_OK,
                    gas_used: 1,
                    events: vec![Event {
                        kind: "app".into(),
                        attributes,
                    }],
                    ..Default::default()
                }
            }
            Ok(Tx::Validator(key, power)) => {
                if power == 0 && !self.state.validators.contains_key(&key) {
                    return ResponseDeliverTx {
                        code: CODE_TYPE_UNAUTHORIZED,
                        log: format!("cannot remove non-existent validator {}", key),
                        ..Default::default()
                    };
                }
                if power == 0 {
                    self.state.validators.remove(&key);
                } else {
                    self.state.validators.insert(key, power);
                }
                self.pending_updates.push(ValidatorUpdate::ed25519(&key, power));
                ResponseDeliverTx {
                    code: CODE_TYPE_OK,
                    ..Default::default()
                }
            }
            Err(log) => ResponseDeliverTx {
                code: CODE_TYPE_ENCODING_ERROR,
                log,
                ..Default::default()
            },
        }
    }

    fn end_block(&mut self, _req: RequestEndBlock) -> ResponseEndBlock {
        ResponseEndBlock {
            validator_updates: std::mem::take(&mut self.pending_updates),
            ..Default::default()
        }
    }

    fn commit(&mut self) -> ResponseCommit {
        self.state.height += 1;
        self.app_hash = self.state.hash();
        let height = self.state.height;
        if self.config.snapshot_interval > 0 && height % self.config.snapshot_interval == 0 {
            self.take_snapshot();
        }
        let retain_height = if self.config.retain_blocks > 0 && height >= self.config.retain_blocks {
            height - self.config.retain_blocks + 1
        } else {
            0
        };
        ResponseCommit {
            data: self.app_hash.clone(),
            retain_height,
        }
    }

    fn list_snapshots(&mut self) -> ResponseListSnapshots {
        ResponseListSnapshots {
            snapshots: self.snapshots.iter().map(|s| s.snapshot.clone()).collect(),
        }
    }

    fn offer_snapshot(&mut self, req: RequestOfferSnapshot) -> ResponseOfferSnapshot {
        let result = match req.snapshot {
            _ if self.restore.is_some() => OfferSnapshotResult::Abort,
            Some(snapshot) if snapshot.format == SNAPSHOT_FORMAT => {
                self.restore = Some((snapshot, Vec::new()));
                OfferSnapshotResult::Accept
            }
            Some(_) => OfferSnapshotResult::RejectFormat,
            None => OfferSnapshotResult::Reject,
        };
        ResponseOfferSnapshot { result }
    }

    fn load_snapshot_chunk(&mut self, req: RequestLoadSnapshotChunk) -> ResponseLoadSnapshotChunk {
        let chunk = self
            .snapshots
            .iter()
            .find(|s| s.snapshot.height == req.height && s.snapshot.format == req.format)
            .and_then(|s| s.chunks.get(req.chunk as usize).cloned())
            .unwrap_or_default();
        ResponseLoadSnapshotChunk { chunk }
    }

    fn apply_snapshot_chunk(&mut self, req: RequestApplySnapshotChunk) -> ResponseApplySnapshotChunk {
        let Some((snapshot, chunks)) = self.restore.as_mut() else {
            return ResponseApplySnapshotChunk {
                result: ApplySnapshotChunkResult::Abort,
                ..Default::default()
            };
        };
        chunks.push(req.chunk);
        if chunks.len() < snapshot.chunks as usize {
            return ResponseApplySnapshotChunk {
                result: ApplySnapshotChunkResult::Accept,
                ..Default::default()
            };
        }

        let bytes = chunks.concat();
        let expected = snapshot.hash.clone();
        self.restore = None;
        if hash_blake3(&bytes).to_vec() != expected {
            return ResponseApplySnapshotChunk {
                result: ApplySnapshotChunkResult::RejectSnapshot,
                ..Default::default()
            };
        }
        match bincode::deserialize::<StoreState>(&bytes) {
            Ok(state) => {
                info!("Restored snapshot at height {}", state.height);
                self.state = state;
                self.app_hash = self.state.hash();
                ResponseApplySnapshotChunk {
                    result: ApplySnapshotChunkResult::Accept,
                    ..Default::default()
                }
            }
            Err(_) => ResponseApplySnapshotChunk {
                result: ApplySnapshotChunkResult::RejectSnapshot,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_core::KeyPair;

    fn deliver(app: &mut KvStoreApp, tx: &str) -> ResponseDeliverTx {
        app.deliver_tx(RequestDeliverTx {
            tx: tx.as_bytes().to_vec(),
        })
    }

    #[test]
    fn test_set_and_commit_changes_hash() {
        let mut app = KvStoreApp::new();
        assert!(deliver(&mut app, "a=1").is_ok());
        let first = app.commit();
        assert_eq!(app.height(), 1);
        assert!(!first.data.is_empty());

        deliver(&mut app, "a=2");
        let second = app.commit();
        assert_ne!(first.data, second.data);
        assert_eq!(app.get("a"), Some("2"));
    }

    #[test]
    fn test_hash_separates_keys_from_values() {
        let mut left = KvStoreApp::new();
        deliver(&mut left, "ab=c");
        let mut right = KvStoreApp::new();
        deliver(&mut right, "a=bc");
        assert_ne!(left.commit().data, right.commit().data);
        assert!(KvStoreApp::new().commit().data.is_empty());
    }

    #[test]
    fn test_invalid_tx_gets_code_not_panic() {
        let mut app = KvStoreApp::new();
        assert_eq!(deliver(&mut app, "novalue").code, CODE_TYPE_ENCODING_ERROR);
        assert_eq!(deliver(&mut app, "=x").code, CODE_TYPE_ENCODING_ERROR);
    }

    #[test]
    fn test_validator_tx_produces_update() {
        let mut app = KvStoreApp::new();
        let kp = KeyPair::from_secret_bytes(&[8u8; 32]);
        let tx = format!("val:{}!7", kp.public.to_hex());
        assert!(deliver(&mut app, &tx).is_ok());
        let end = app.end_block(RequestEndBlock { height: 1 });
        assert_eq!(end.validator_updates, vec![ValidatorUpdate::ed25519(&kp.public, 7)]);

        let remove_unknown = format!("val:{}!0", KeyPair::from_secret_bytes(&[9u8; 32]).public.to_hex());
        assert_eq!(deliver(&mut app, &remove_unknown).code, CODE_TYPE_UNAUTHORIZED);
    }

    #[test]
    fn test_retain_height() {
        let mut app = KvStoreApp::with_config(KvStoreConfig {
            retain_blocks: 2,
            ..Default::default()
        });
        assert_eq!(app.commit().retain_height, 0);
        assert_eq!(app.commit().retain_height, 1);
        assert_eq!(app.commit().retain_height, 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut source = KvStoreApp::with_config(KvStoreConfig {
            snapshot_interval: 2,
            snapshot_chunk_size: 8,
            ..Default::default()
        });
        deliver(&mut source, "alpha=one");
        source.commit();
        deliver(&mut source, "beta=two");
        let committed = source.commit();

        let snapshots = source.list_snapshots().snapshots;
        assert_eq!(snapshots.len(), 1);
        let snapshot = snapshots[0].clone();

        let mut target = KvStoreApp::new();
        let offer = target.offer_snapshot(RequestOfferSnapshot {
            snapshot: Some(snapshot.clone()),
            app_hash: committed.data.clone(),
        });
        assert_eq!(offer.result, OfferSnapshotResult::Accept);
        for index in 0..snapshot.chunks {
            let chunk = source
                .load_snapshot_chunk(RequestLoadSnapshotChunk {
                    height: snapshot.height,
                    format: snapshot.format,
                    chunk: index,
                })
                .chunk;
            let resp = target.apply_snapshot_chunk(RequestApplySnapshotChunk {
                index,
                chunk,
                sender: String::new(),
            });
            assert_eq!(resp.result, ApplySnapshotChunkResult::Accept);
        }
        assert_eq!(target.get("beta"), Some("two"));
        assert_eq!(target.info(RequestInfo::default()).last_block_app_hash, committed.data);
    }
}
