//! Messages consumed by the consensus machine.

use std::fmt;

use halcyon_core::{Block, Proposal, Vote};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    /// Full body of a proposed block. Sent right after its proposal.
    Block {
        height: u64,
        round: u32,
        block: Box<Block>,
    },
    Vote(Vote),
}

impl ConsensusMessage {
    pub fn height(&self) -> u64 {
        match self {
            ConsensusMessage::Proposal(p) => p.height,
            ConsensusMessage::Block { height, .. } => *height,
            ConsensusMessage::Vote(v) => v.height,
        }
    }

    pub fn round(&self) -> u32 {
        match self {
            ConsensusMessage::Proposal(p) => p.round,
            ConsensusMessage::Block { round, .. } => *round,
            ConsensusMessage::Vote(v) => v.round,
        }
    }
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusMessage::Proposal(p) => {
                write!(f, "Proposal{{{}/{} {}}}", p.height, p.round, p.block_id)
            }
            ConsensusMessage::Block {
                height,
                round,
                block,
            } => write!(f, "Block{{{}/{} {}}}", height, round, block.block_id()),
            ConsensusMessage::Vote(v) => write!(f, "{}", v),
        }
    }
}

/// A message and where it came from. `peer_id` is `None` for messages the
/// node produced itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgInfo {
    pub msg: ConsensusMessage,
    pub peer_id: Option<String>,
}

impl MsgInfo {
    pub fn internal(msg: ConsensusMessage) -> Self {
        MsgInfo { msg, peer_id: None }
    }

    pub fn from_peer(msg: ConsensusMessage, peer_id: impl Into<String>) -> Self {
        MsgInfo {
            msg,
            peer_id: Some(peer_id.into()),
        }
    }
}
