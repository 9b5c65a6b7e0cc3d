pub mod block;
pub mod commit;
pub mod evidence;
pub mod genesis;
pub mod params;
pub mod round;
pub mod validator;
pub mod vote;

pub use block::{
    evidence_hash, tx_hash, txs_hash, Block, BlockId, Header, Tx, Version, BLOCK_PROTOCOL,
    MAX_CHAIN_ID_LEN,
};
pub use commit::{Commit, CommitSig};
pub use evidence::{DuplicateVoteEvidence, Evidence};
pub use genesis::{GenesisDoc, GenesisValidator};
pub use params::{
    BlockParams, ConsensusParams, ConsensusParamsUpdate, EvidenceParams, ValidatorParams,
    VersionParams, MAX_BLOCK_SIZE_BYTES,
};
pub use round::RoundStep;
pub use validator::{Validator, ValidatorSet, MAX_TOTAL_VOTING_POWER};
pub use vote::{ConflictingVotes, Proposal, Vote, VoteType};
