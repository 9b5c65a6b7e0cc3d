use std::collections::BTreeSet;
use std::sync::Mutex;

use halcyon_core::{DuplicateVoteEvidence, Evidence, Hash, Vote};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::state::State;

/// Source and sink of misbehaviour evidence.
pub trait EvidencePool: Send + Sync {
    /// Verified evidence not yet committed, up to `max_bytes` in total. A
    /// negative limit means unlimited.
    fn pending_evidence(&self, max_bytes: i64) -> Vec<Evidence>;

    /// Validate the evidence of a proposed block on top of `state`.
    fn check_evidence(&self, state: &State, evidence: &[Evidence]) -> Result<(), ValidationError>;

    /// Called after a block is committed with the new state and the
    /// evidence the block carried.
    fn update(&self, state: &State, committed: &[Evidence]);

    /// A validator signed two different votes for the same height, round
    /// and type.
    fn report_conflicting_votes(&self, vote_a: Vote, vote_b: Vote);
}

/// Produces no evidence and trusts whatever a block carries. Used when
/// replaying blocks the network already committed.
#[derive(Debug, Default)]
pub struct NopEvidencePool;

impl EvidencePool for NopEvidencePool {
    fn pending_evidence(&self, _max_bytes: i64) -> Vec<Evidence> {
        Vec::new()
    }

    fn check_evidence(&self, _state: &State, _evidence: &[Evidence]) -> Result<(), ValidationError> {
        Ok(())
    }

    fn update(&self, _state: &State, _committed: &[Evidence]) {}

    fn report_conflicting_votes(&self, _vote_a: Vote, _vote_b: Vote) {}
}

#[derive(Default)]
struct PoolInner {
    state: Option<State>,
    pending: Vec<Evidence>,
    committed: BTreeSet<Hash>,
}

/// Keeps duplicate-vote evidence built from conflicting votes seen by this
/// node until a block commits it.
#[derive(Default)]
pub struct MemoryEvidencePool {
    inner: Mutex<PoolInner>,
}

impl MemoryEvidencePool {
    pub fn new(state: &State) -> Self {
        MemoryEvidencePool {
            inner: Mutex::new(PoolInner {
                state: Some(state.clone()),
                ..Default::default()
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.pending.len()).unwrap_or(0)
    }
}

fn is_expired(state: &State, evidence: &Evidence) -> bool {
    let params = &state.consensus_params.evidence;
    let age_blocks = state.last_block_height.saturating_sub(evidence.height());
    let age_ms = state.last_block_time.saturating_sub(evidence.time());
    age_blocks > params.max_age_num_blocks && age_ms > params.max_age_duration_ms
}

fn verify_evidence(state: &State, evidence: &Evidence) -> Result<(), ValidationError> {
    evidence.validate_basic()?;
    if evidence.height() > state.last_block_height {
        return Err(ValidationError::Evidence(format!(
            "evidence from future height {}",
            evidence.height()
        )));
    }
    if is_expired(state, evidence) {
        return Err(ValidationError::Evidence(format!(
            "evidence from height {} has expired",
            evidence.height()
        )));
    }
    let Evidence::DuplicateVote(ev) = evidence;
    ev.verify(&state.chain_id, &ev.vote_a.validator_address)?;
    Ok(())
}

impl EvidencePool for MemoryEvidencePool {
    fn pending_evidence(&self, max_bytes: i64) -> Vec<Evidence> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let Some(state) = &inner.state else {
            return Vec::new();
        };

        let mut total = 0i64;
        let mut out = Vec::new();
        for ev in &inner.pending {
            // Evidence for the height being decided waits for the next one.
            if ev.height() > state.last_block_height {
                continue;
            }
            let size = ev.bytes().len() as i64;
            if max_bytes >= 0 && total + size > max_bytes {
                break;
            }
            total += size;
            out.push(ev.clone());
        }
        out
    }

    fn check_evidence(&self, state: &State, evidence: &[Evidence]) -> Result<(), ValidationError> {
        let committed = match self.inner.lock() {
            Ok(inner) => inner.committed.clone(),
            Err(_) => BTreeSet::new(),
        };
        let mut seen = BTreeSet::new();
        for ev in evidence {
            let hash = ev.hash();
            if !seen.insert(hash) {
                return Err(ValidationError::Evidence(format!("duplicate evidence {}", hash)));
            }
            if committed.contains(&hash) {
                return Err(ValidationError::Evidence(format!("evidence {} already committed", hash)));
            }
            verify_evidence(state, ev)?;
        }
        Ok(())
    }

    fn update(&self, state: &State, committed: &[Evidence]) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        for ev in committed {
            inner.committed.insert(ev.hash());
        }
        let PoolInner {
            pending,
            committed: done,
            ..
        } = &mut *inner;
        pending.retain(|ev| !done.contains(&ev.hash()) && !is_expired(state, ev));
        inner.state = Some(state.clone());
    }

    fn report_conflicting_votes(&self, vote_a: Vote, vote_b: Vote) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(state) = &inner.state else {
            warn!("conflicting votes reported before the pool has a state");
            return;
        };

        let val_set = if vote_a.height == state.next_height() {
            &state.validators
        } else if vote_a.height == state.last_block_height {
            &state.last_validators
        } else {
            debug!(height = vote_a.height, "conflicting votes outside the tracked heights");
            return;
        };
        let Some(dve) = DuplicateVoteEvidence::new(vote_a, vote_b, state.last_block_time, val_set)
        else {
            warn!("conflicting votes from a non-validator");
            return;
        };
        if let Err(e) = dve.verify(&state.chain_id, &dve.vote_a.validator_address) {
            warn!(error = %e, "dropping unverifiable duplicate vote evidence");
            return;
        }

        let evidence = Evidence::DuplicateVote(dve);
        let hash = evidence.hash();
        if inner.committed.contains(&hash) || inner.pending.iter().any(|ev| ev.hash() == hash) {
            return;
        }
        warn!(
            validator = %evidence.offender().0,
            height = evidence.height(),
            "duplicate vote evidence added"
        );
        inner.pending.push(evidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::make_genesis_state;
    use crate::test_util::{genesis_doc, keys, signed_vote};
    use halcyon_core::{hash_blake3, BlockId, VoteType};

    fn conflicting(state: &State, keys: &[halcyon_core::KeyPair], height: u64) -> (Vote, Vote) {
        let a = signed_vote(state, keys, 0, VoteType::Prevote, height, 0, BlockId::new(hash_blake3(b"a")));
        let b = signed_vote(state, keys, 0, VoteType::Prevote, height, 0, BlockId::new(hash_blake3(b"b")));
        (a, b)
    }

    #[test]
    fn test_conflicting_votes_become_evidence_after_their_height() {
        let keys = keys(4);
        let mut state = make_genesis_state(&genesis_doc(&keys, 10)).unwrap();
        let pool = MemoryEvidencePool::new(&state);

        let (a, b) = conflicting(&state, &keys, 1);
        pool.report_conflicting_votes(a.clone(), b.clone());
        pool.report_conflicting_votes(b, a);
        assert_eq!(pool.pending_count(), 1);

        // Still deciding height 1: nothing to propose yet.
        assert!(pool.pending_evidence(-1).is_empty());

        state.last_block_height = 1;
        state.last_validators = state.validators.clone();
        pool.update(&state, &[]);
        let pending = pool.pending_evidence(-1);
        assert_eq!(pending.len(), 1);
        assert!(pool.check_evidence(&state, &pending).is_ok());
        assert!(pool.pending_evidence(10).is_empty());

        pool.update(&state, &pending);
        assert_eq!(pool.pending_count(), 0);
        assert!(pool.check_evidence(&state, &pending).is_err());
    }

    #[test]
    fn test_check_rejects_future_and_duplicate_evidence() {
        let keys = keys(4);
        let state = make_genesis_state(&genesis_doc(&keys, 10)).unwrap();
        let (a, b) = conflicting(&state, &keys, 1);
        let ev = Evidence::DuplicateVote(
            DuplicateVoteEvidence::new(a, b, state.last_block_time, &state.validators).unwrap(),
        );
        let pool = MemoryEvidencePool::new(&state);

        assert!(pool.check_evidence(&state, &[ev.clone()]).is_err());

        let mut later = state.clone();
        later.last_block_height = 2;
        assert!(pool.check_evidence(&later, &[ev.clone()]).is_ok());
        assert!(pool.check_evidence(&later, &[ev.clone(), ev]).is_err());
        assert!(NopEvidencePool.check_evidence(&later, &[]).is_ok());
    }
}
