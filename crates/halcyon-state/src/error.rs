use halcyon_app::ClientError;
use halcyon_core::{CommitError, CoreError, ValidatorSetError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No validator set stored for height {0}")]
    NoValidatorSet(u64),

    #[error("No consensus params stored for height {0}")]
    NoConsensusParams(u64),

    #[error("No ABCI responses stored for height {0}")]
    NoAbciResponses(u64),

    #[error("Last height changed {last_changed} is above height {height}")]
    BadLastHeightChanged { height: u64, last_changed: u64 },

    #[error("Block store expected height {expected}, got {got}")]
    NonContiguousBlock { expected: u64, got: u64 },

    #[error("Cannot prune to height {retain_height}: store height is {height}")]
    PruneBeyondHeight { retain_height: u64, height: u64 },

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Validator set error: {0}")]
    ValidatorSet(#[from] ValidatorSetError),
}

/// Why a block was rejected before it reached the application.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid block: {0}")]
    Basic(#[from] CoreError),

    #[error("Wrong block version: expected {expected:?}, got {got:?}")]
    WrongVersion { expected: (u64, u64), got: (u64, u64) },

    #[error("Wrong chain id: expected {expected}, got {got}")]
    WrongChainId { expected: String, got: String },

    #[error("Wrong height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("Wrong {field}: expected {expected}, got {got}")]
    WrongHash {
        field: &'static str,
        expected: String,
        got: String,
    },

    #[error("Invalid last commit: {0}")]
    LastCommit(#[from] CommitError),

    #[error("Block at initial height must have an empty last commit")]
    InitialLastCommitNotEmpty,

    #[error("Wrong block time: expected {expected}, got {got}")]
    WrongTime { expected: u64, got: u64 },

    #[error("Block time {got} is not after last block time {last}")]
    TimeNotMonotonic { got: u64, last: u64 },

    #[error("Proposer {0} is not a validator")]
    UnknownProposer(String),

    #[error("Evidence is {got} bytes, max {max}")]
    EvidenceTooLarge { got: i64, max: i64 },

    #[error("Invalid evidence: {0}")]
    Evidence(String),
}

/// Failures of the block execution pipeline. `InvalidBlock` rejects a
/// candidate; every other variant is fatal for the node.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] ValidationError),

    #[error("Application connection error: {0}")]
    Proxy(#[from] ClientError),

    #[error("Invalid validator update: {0}")]
    InvalidValidatorUpdate(String),

    #[error("Validator set update failed: {0}")]
    ValidatorSet(#[from] ValidatorSetError),

    #[error("Invalid consensus params: {0}")]
    InvalidParams(String),

    #[error("State error: {0}")]
    State(#[from] StateError),
}
