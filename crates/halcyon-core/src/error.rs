use thiserror::Error;

use crate::crypto::{Hash, PublicKey};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid hash length")]
    InvalidHashLength,

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid merkle proof: {0}")]
    InvalidProof(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid consensus params: {0}")]
    InvalidParams(String),

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validator set error: {0}")]
    ValidatorSet(#[from] ValidatorSetError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorSetError {
    #[error("Validator set is empty")]
    Empty,

    #[error("Duplicate validator entry {0}")]
    DuplicateEntry(PublicKey),

    #[error("Validator {0} has negative voting power {1}")]
    NegativePower(PublicKey, i64),

    #[error("Validator {0} has zero voting power in a new set")]
    ZeroPower(PublicKey),

    #[error("Voting power {power} of {address} exceeds the maximum {max}")]
    PowerTooHigh {
        address: PublicKey,
        power: i64,
        max: i64,
    },

    #[error("Cannot remove unknown validator {0}")]
    RemoveNonExistent(PublicKey),

    #[error("Total voting power {0} exceeds the maximum")]
    TotalPowerOverflow(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("Unexpected step: vote for height {height}/round {round}/{vote_type:?}")]
    UnexpectedStep {
        height: u64,
        round: u32,
        vote_type: crate::types::VoteType,
    },

    #[error("Invalid validator index {0}")]
    InvalidValidatorIndex(u32),

    #[error("Invalid validator address {0}")]
    InvalidValidatorAddress(PublicKey),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid block hash")]
    InvalidBlockHash,

    #[error("Conflicting votes from validator {}", .0.vote_a.validator_address)]
    ConflictingVote(Box<crate::types::ConflictingVotes>),

    #[error("Vote from unwanted round {0}")]
    UnwantedRound(u32),

    #[error("Non-deterministic signature")]
    NonDeterministicSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("Invalid commit: wrong set size {expected} vs {got} signatures")]
    WrongSetSize { expected: usize, got: usize },

    #[error("Invalid commit: wrong height {expected} vs {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("Invalid commit: wrong block id {expected} vs {got}")]
    WrongBlockId { expected: Hash, got: Hash },

    #[error("Invalid commit: wrong validator at index {0}")]
    WrongValidator(usize),

    #[error("Invalid commit: bad signature at index {0}")]
    InvalidSignature(usize),

    #[error("Invalid commit: insufficient voting power, got {got}, needed more than {needed}")]
    NotEnoughVotingPower { got: i64, needed: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    #[error("{0} already stopped")]
    AlreadyStopped(&'static str),

    #[error("{0} not started")]
    NotStarted(&'static str),

    #[error("{0} failed to start: {1}")]
    StartFailed(&'static str, String),
}
