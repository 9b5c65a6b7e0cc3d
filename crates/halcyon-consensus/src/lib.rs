//! Halcyon Consensus - round-based BFT agreement on blocks
//!
//! A validator set agrees on one block per height through rounds of
//! propose, prevote and precommit. Locks keep a validator from precommitting
//! a conflicting block without a newer polka, so at most one block can gather
//! +2/3 precommits at a height. Decided blocks are stored and executed
//! through the `BlockExecutor`; a write-ahead log and the startup handshake
//! make the machine resumable after a crash.

pub mod config;
pub mod error;
pub mod gossip;
pub mod height_vote_set;
pub mod messages;
pub mod replay;
pub mod round_state;
pub mod signer;
pub mod state;
pub mod ticker;
pub mod vote_set;
pub mod wal;

pub use config::ConsensusConfig;
pub use error::{ConsensusError, SignerError, WalError};
pub use gossip::{Gossip, LocalGossip, LocalNetwork, NopGossip};
pub use height_vote_set::HeightVoteSet;
pub use messages::{ConsensusMessage, MsgInfo};
pub use replay::Handshaker;
pub use round_state::{RoundState, RoundStateSummary};
pub use signer::{LastSignState, SignStep, Signer};
pub use state::{ConsensusHandle, ConsensusState};
pub use ticker::{TimeoutInfo, TimeoutTicker};
pub use vote_set::VoteSet;
pub use wal::{FileWal, MemWal, Wal, WalMessage};
