use halcyon_app::ClientError;
use halcyon_core::{CoreError, VoteError};
use halcyon_state::{ExecError, StateError, ValidationError};
use thiserror::Error;

use crate::signer::SignStep;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Invalid proposal signature")]
    InvalidProposalSignature,

    #[error("Vote error: {0}")]
    Vote(#[from] VoteError),

    #[error("Committed block failed validation: {0}")]
    InvalidCommittedBlock(#[from] ValidationError),

    #[error("No seen commit stored for height {0}")]
    MissingCommit(u64),

    #[error("WAL already contains #ENDHEIGHT {0}")]
    WalAhead(u64),

    #[error("App hash mismatch at height {height}: expected {expected}, got {got}")]
    AppHashMismatch {
        height: u64,
        expected: String,
        got: String,
    },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Consensus stopped")]
    Stopped,

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Application connection error: {0}")]
    Proxy(#[from] ClientError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl ConsensusError {
    /// Errors caused by a bad message from the network. They are logged and
    /// the message is dropped; everything else stops the machine.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ConsensusError::InvalidProposal(_)
                | ConsensusError::InvalidProposalSignature
                | ConsensusError::Vote(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted WAL record at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Height regression: last signed {last}, requested {requested}")]
    HeightRegression { last: u64, requested: u64 },

    #[error("Round regression at height {height}: last signed {last}, requested {requested}")]
    RoundRegression {
        height: u64,
        last: u32,
        requested: u32,
    },

    #[error("Step regression at {height}/{round}: last signed {last:?}, requested {requested:?}")]
    StepRegression {
        height: u64,
        round: u32,
        last: SignStep,
        requested: SignStep,
    },

    #[error("Conflicting data at {height}/{round}/{step:?}")]
    ConflictingData {
        height: u64,
        round: u32,
        step: SignStep,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
