use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and queue sizes of the consensus machine.
///
/// Round-dependent timeouts grow linearly: `base + delta * round`, so that
/// a network with a slow link eventually has rounds long enough to decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub timeout_propose_ms: u64,
    pub timeout_propose_delta_ms: u64,
    pub timeout_prevote_ms: u64,
    pub timeout_prevote_delta_ms: u64,
    pub timeout_precommit_ms: u64,
    pub timeout_precommit_delta_ms: u64,
    /// Pause after a commit so late precommits can be collected
    pub timeout_commit_ms: u64,
    /// Start the next height as soon as precommits from every validator
    /// are in, instead of waiting out `timeout_commit_ms`
    pub skip_timeout_commit: bool,
    /// Write-ahead log location; `None` keeps the log in memory
    pub wal_path: Option<PathBuf>,
    /// Roll the log into a new segment after a height once it is this
    /// large; 0 never rolls
    pub wal_segment_size: u64,
    /// Rolled log segments kept on disk
    pub wal_max_segments: usize,
    /// Capacity of the inbound peer message queue
    pub peer_queue_size: usize,
    /// Capacity of the timeout queue
    pub timeout_queue_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            timeout_propose_ms: 3000,
            timeout_propose_delta_ms: 500,
            timeout_prevote_ms: 1000,
            timeout_prevote_delta_ms: 500,
            timeout_precommit_ms: 1000,
            timeout_precommit_delta_ms: 500,
            timeout_commit_ms: 1000,
            skip_timeout_commit: false,
            wal_path: None,
            wal_segment_size: crate::wal::DEFAULT_SEGMENT_SIZE,
            wal_max_segments: crate::wal::DEFAULT_MAX_SEGMENTS,
            peer_queue_size: 1000,
            timeout_queue_size: 100,
        }
    }
}

impl ConsensusConfig {
    /// Short timeouts for in-process networks.
    pub fn test_config() -> Self {
        ConsensusConfig {
            timeout_propose_ms: 400,
            timeout_propose_delta_ms: 20,
            timeout_prevote_ms: 100,
            timeout_prevote_delta_ms: 20,
            timeout_precommit_ms: 100,
            timeout_precommit_delta_ms: 20,
            timeout_commit_ms: 50,
            ..Default::default()
        }
    }

    pub fn propose(&self, round: u32) -> Duration {
        linear(self.timeout_propose_ms, self.timeout_propose_delta_ms, round)
    }

    pub fn prevote(&self, round: u32) -> Duration {
        linear(self.timeout_prevote_ms, self.timeout_prevote_delta_ms, round)
    }

    pub fn precommit(&self, round: u32) -> Duration {
        linear(self.timeout_precommit_ms, self.timeout_precommit_delta_ms, round)
    }

    /// Start time of the next height relative to the commit time `t`.
    pub fn commit(&self, t: u64) -> u64 {
        t + self.timeout_commit_ms
    }
}

fn linear(base: u64, delta: u64, round: u32) -> Duration {
    Duration::from_millis(base.saturating_add(delta.saturating_mul(u64::from(round))))
}
