//! Messages of the application protocol.
//!
//! Every request has exactly one matching response variant; `Exception` is
//! returned instead when the application could not handle a request at all.

use halcyon_core::{
    ConsensusParams, ConsensusParamsUpdate, Hash, Header, PublicKey, KEY_TYPE_ED25519,
};
use serde::{Deserialize, Serialize};

pub const CODE_TYPE_OK: u32 = 0;
pub const CODE_TYPE_ENCODING_ERROR: u32 = 1;
pub const CODE_TYPE_BAD_NONCE: u32 = 2;
pub const CODE_TYPE_UNAUTHORIZED: u32 = 3;
pub const CODE_TYPE_UNKNOWN_ERROR: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Echo(RequestEcho),
    Flush,
    Info(RequestInfo),
    SetOption(RequestSetOption),
    InitChain(RequestInitChain),
    Query(RequestQuery),
    BeginBlock(RequestBeginBlock),
    CheckTx(RequestCheckTx),
    DeliverTx(RequestDeliverTx),
    EndBlock(RequestEndBlock),
    Commit,
    ListSnapshots,
    OfferSnapshot(RequestOfferSnapshot),
    LoadSnapshotChunk(RequestLoadSnapshotChunk),
    ApplySnapshotChunk(RequestApplySnapshotChunk),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Echo(_) => "Echo",
            Request::Flush => "Flush",
            Request::Info(_) => "Info",
            Request::SetOption(_) => "SetOption",
            Request::InitChain(_) => "InitChain",
            Request::Query(_) => "Query",
            Request::BeginBlock(_) => "BeginBlock",
            Request::CheckTx(_) => "CheckTx",
            Request::DeliverTx(_) => "DeliverTx",
            Request::EndBlock(_) => "EndBlock",
            Request::Commit => "Commit",
            Request::ListSnapshots => "ListSnapshots",
            Request::OfferSnapshot(_) => "OfferSnapshot",
            Request::LoadSnapshotChunk(_) => "LoadSnapshotChunk",
            Request::ApplySnapshotChunk(_) => "ApplySnapshotChunk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Exception(ResponseException),
    Echo(ResponseEcho),
    Flush,
    Info(ResponseInfo),
    SetOption(ResponseSetOption),
    InitChain(ResponseInitChain),
    Query(ResponseQuery),
    BeginBlock(ResponseBeginBlock),
    CheckTx(ResponseCheckTx),
    DeliverTx(ResponseDeliverTx),
    EndBlock(ResponseEndBlock),
    Commit(ResponseCommit),
    ListSnapshots(ResponseListSnapshots),
    OfferSnapshot(ResponseOfferSnapshot),
    LoadSnapshotChunk(ResponseLoadSnapshotChunk),
    ApplySnapshotChunk(ResponseApplySnapshotChunk),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Exception(_) => "Exception",
            Response::Echo(_) => "Echo",
            Response::Flush => "Flush",
            Response::Info(_) => "Info",
            Response::SetOption(_) => "SetOption",
            Response::InitChain(_) => "InitChain",
            Response::Query(_) => "Query",
            Response::BeginBlock(_) => "BeginBlock",
            Response::CheckTx(_) => "CheckTx",
            Response::DeliverTx(_) => "DeliverTx",
            Response::EndBlock(_) => "EndBlock",
            Response::Commit(_) => "Commit",
            Response::ListSnapshots(_) => "ListSnapshots",
            Response::OfferSnapshot(_) => "OfferSnapshot",
            Response::LoadSnapshotChunk(_) => "LoadSnapshotChunk",
            Response::ApplySnapshotChunk(_) => "ApplySnapshotChunk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseException {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestEcho {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseEcho {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    pub version: String,
    pub block_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub data: String,
    pub version: String,
    pub app_version: u64,
    pub last_block_height: u64,
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestSetOption {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseSetOption {
    pub code: u32,
    pub log: String,
    pub info: String,
}

/// Public key as carried by the protocol: a type name plus raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKeyBytes {
    pub key_type: String,
    pub data: Vec<u8>,
}

impl PubKeyBytes {
    pub fn ed25519(key: &PublicKey) -> Self {
        PubKeyBytes {
            key_type: KEY_TYPE_ED25519.to_string(),
            data: key.to_vec(),
        }
    }

    /// Decode into an engine key. Only ed25519 keys are understood.
    pub fn to_public_key(&self) -> Option<PublicKey> {
        if self.key_type != KEY_TYPE_ED25519 {
            return None;
        }
        PublicKey::from_slice(&self.data)
    }
}

/// A validator change returned by InitChain or EndBlock; power 0 removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: PubKeyBytes,
    pub power: i64,
}

impl ValidatorUpdate {
    pub fn ed25519(key: &PublicKey, power: i64) -> Self {
        ValidatorUpdate {
            pub_key: PubKeyBytes::ed25519(key),
            power,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestInitChain {
    pub time: u64,
    pub chain_id: String,
    pub consensus_params: Option<ConsensusParams>,
    pub validators: Vec<ValidatorUpdate>,
    pub app_state_bytes: Vec<u8>,
    pub initial_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseInitChain {
    pub consensus_params: Option<ConsensusParamsUpdate>,
    pub validators: Vec<ValidatorUpdate>,
    pub app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestQuery {
    pub data: Vec<u8>,
    pub path: String,
    pub height: u64,
    pub prove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseQuery {
    pub code: u32,
    pub log: String,
    pub info: String,
    pub index: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub height: u64,
    pub codespace: String,
}

/// Validator identity and power as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: PublicKey,
    pub power: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub validator: ValidatorInfo,
    pub signed_last_block: bool,
}

/// Which validators of the previous height signed its commit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastCommitInfo {
    pub round: u32,
    pub votes: Vec<VoteInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisbehaviorKind {
    DuplicateVote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misbehavior {
    pub kind: MisbehaviorKind,
    pub validator: ValidatorInfo,
    pub height: u64,
    pub time: u64,
    pub total_voting_power: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBeginBlock {
    pub hash: Hash,
    pub header: Header,
    pub last_commit_info: LastCommitInfo,
    pub byzantine_validators: Vec<Misbehavior>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    pub index: bool,
}

/// Application-defined event attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseBeginBlock {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CheckTxKind {
    #[default]
    New,
    Recheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestCheckTx {
    pub tx: Vec<u8>,
    pub kind: CheckTxKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseCheckTx {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub info: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<Event>,
    pub codespace: String,
}

impl ResponseCheckTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_TYPE_OK
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestDeliverTx {
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseDeliverTx {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub info: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<Event>,
    pub codespace: String,
}

impl ResponseDeliverTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_TYPE_OK
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestEndBlock {
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
    pub consensus_param_updates: Option<ConsensusParamsUpdate>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseCommit {
    /// The application hash after this block
    pub data: Vec<u8>,
    /// Blocks below this height may be pruned; 0 keeps everything
    pub retain_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub height: u64,
    pub format: u32,
    pub chunks: u32,
    pub hash: Vec<u8>,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseListSnapshots {
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestOfferSnapshot {
    pub snapshot: Option<Snapshot>,
    pub app_hash: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OfferSnapshotResult {
    #[default]
    Unknown,
    Accept,
    Abort,
    Reject,
    RejectFormat,
    RejectSender,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseOfferSnapshot {
    pub result: OfferSnapshotResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestLoadSnapshotChunk {
    pub height: u64,
    pub format: u32,
    pub chunk: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseLoadSnapshotChunk {
    pub chunk: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestApplySnapshotChunk {
    pub index: u32,
    pub chunk: Vec<u8>,
    pub sender: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApplySnapshotChunkResult {
    #[default]
    Unknown,
    Accept,
    Abort,
    Retry,
    RetrySnapshot,
    RejectSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseApplySnapshotChunk {
    pub result: ApplySnapshotChunkResult,
    pub refetch_chunks: Vec<u32>,
    pub reject_senders: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_core::KeyPair;

    #[test]
    fn test_pub_key_bytes_roundtrip() {
        let kp = KeyPair::from_secret_bytes(&[7u8; 32]);
        let update = ValidatorUpdate::ed25519(&kp.public, 5);
        assert_eq!(update.pub_key.to_public_key(), Some(kp.public));

        let foreign = PubKeyBytes {
            key_type: "secp256k1".into(),
            data: kp.public.to_vec(),
        };
        assert_eq!(foreign.to_public_key(), None);
    }

    #[test]
    fn test_request_wire_roundtrip() {
        let req = Request::DeliverTx(RequestDeliverTx {
            tx: b"k=v".to_vec(),
        });
        let bytes = bincode::serialize(&req).unwrap();
        let decoded: Request = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.kind(), "DeliverTx");

        let json = serde_json::to_string(&Response::Commit(ResponseCommit::default())).unwrap();
        let decoded: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.kind(), "Commit");
    }
}
