//! Weighted validator sets with deterministic proposer rotation.
//!
//! Every validator accumulates its voting power into `proposer_priority` once
//! per increment; the highest accumulator proposes and pays back the total
//! power. Over many rounds each validator proposes in proportion to its power.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_from_byte_slices, verify, Hash, PublicKey};
use crate::error::{CommitError, ValidatorSetError};
use crate::serialize::CanonicalEncoder;
use crate::types::block::BlockId;
use crate::types::commit::Commit;

/// Upper bound on the sum of all voting power, leaving headroom for the
/// priority arithmetic.
pub const MAX_TOTAL_VOTING_POWER: i64 = i64::MAX / 8;

/// Priorities are kept within `PRIORITY_WINDOW_SIZE_FACTOR * total` of each
/// other.
pub const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: PublicKey,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(pub_key: PublicKey, voting_power: i64) -> Self {
        Validator {
            pub_key,
            voting_power,
            proposer_priority: 0,
        }
    }

    pub fn address(&self) -> &PublicKey {
        &self.pub_key
    }

    // Higher priority wins; ties go to the smaller address.
    fn beats(&self, other: &Validator) -> bool {
        match self.proposer_priority.cmp(&other.proposer_priority) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.pub_key < other.pub_key,
        }
    }

    /// Bytes committed to by the set hash. Priority is excluded: it changes
    /// every round.
    fn hash_bytes(&self) -> Vec<u8> {
        CanonicalEncoder::new()
            .fixed(self.pub_key.as_bytes())
            .i64(self.voting_power)
            .finish()
    }
}

/// Validators ordered by voting power (descending), then address (ascending).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    proposer: Option<Validator>,
    total_voting_power: i64,
}

impl ValidatorSet {
    /// Build a set from scratch. Zero power entries are rejected, and the
    /// first proposer is selected.
    pub fn new(validators: Vec<Validator>) -> Result<Self, ValidatorSetError> {
        if let Some(v) = validators.iter().find(|v| v.voting_power == 0) {
            return Err(ValidatorSetError::ZeroPower(v.pub_key));
        }
        let mut set = ValidatorSet::default();
        set.update_with_change_set(&validators)?;
        set.increment_proposer_priority(1);
        Ok(set)
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_voting_power(&self) -> i64 {
        self.total_voting_power
    }

    /// True when `power` is strictly more than two thirds of the total.
    pub fn is_quorum(&self, power: i64) -> bool {
        power > self.total_voting_power * 2 / 3
    }

    pub fn get_by_address(&self, address: &PublicKey) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, v)| v.pub_key == *address)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn has_address(&self, address: &PublicKey) -> bool {
        self.get_by_address(address).is_some()
    }

    /// The proposer selected by the last increment, or the highest priority
    /// validator if none was selected since the last change.
    pub fn get_proposer(&self) -> Option<&Validator> {
        match &self.proposer {
            Some(p) => Some(p),
            None => self.find_proposer_index().map(|i| &self.validators[i]),
        }
    }

    fn find_proposer_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, v) in self.validators.iter().enumerate() {
            best = match best {
                Some(b) if !v.beats(&self.validators[b]) => Some(b),
                _ => Some(i),
            };
        }
        best
    }

    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self.validators.iter().map(Validator::hash_bytes).collect();
        hash_from_byte_slices(&leaves)
    }

    /// Advance proposer selection `times` rounds.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        if self.validators.is_empty() || times == 0 {
            return;
        }
        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR * self.total_voting_power);
        self.shift_by_avg_proposer_priority();

        for _ in 0..times {
            self.proposer = self.increment_once();
        }
    }

    pub fn copy_increment_proposer_priority(&self, times: u32) -> Self {
        let mut copy = self.clone();
        copy.increment_proposer_priority(times);
        copy
    }

    fn increment_once(&mut self) -> Option<Validator> {
        for v in &mut self.validators {
            v.proposer_priority = v.proposer_priority.saturating_add(v.voting_power);
        }
        let idx = self.find_proposer_index()?;
        let total = self.total_voting_power;
        let proposer = &mut self.validators[idx];
        proposer.proposer_priority = proposer.proposer_priority.saturating_sub(total);
        Some(proposer.clone())
    }

    fn rescale_priorities(&mut self, diff_max: i64) {
        if self.validators.is_empty() || diff_max <= 0 {
            return;
        }
        let max = self.validators.iter().map(|v| v.proposer_priority).max().unwrap_or(0);
        let min = self.validators.iter().map(|v| v.proposer_priority).min().unwrap_or(0);
        let diff = max.saturating_sub(min);
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for v in &mut self.validators {
                v.proposer_priority /= ratio;
            }
        }
    }

    fn shift_by_avg_proposer_priority(&mut self) {
        if self.validators.is_empty() {
            return;
        }
        let sum: i128 = self
            .validators
            .iter()
            .map(|v| v.proposer_priority as i128)
            .sum();
        let avg = sum.div_euclid(self.validators.len() as i128) as i64;
        for v in &mut self.validators {
            v.proposer_priority = v.proposer_priority.saturating_sub(avg);
        }
    }

    /// Apply validator updates atomically: power 0 removes, a known address
    /// is re-weighted, an unknown one is added. On error the set is left
    /// untouched.
    pub fn update_with_change_set(&mut self, changes: &[Validator]) -> Result<(), ValidatorSetError> {
        if changes.is_empty() {
            return Ok(());
        }
        let (updates, deletes) = process_changes(changes)?;

        let mut next = self.clone();
        let removed_power = next.verify_removals(&deletes)?;
        let tvp_after_updates = next.verify_updates(&updates, removed_power)?;
        let updates = next.compute_new_priorities(updates, tvp_after_updates);

        for update in updates {
            match next.validators.iter().position(|v| v.pub_key == update.pub_key) {
                Some(pos) => next.validators[pos] = update,
                None => next.validators.push(update),
            }
        }
        next.validators.retain(|v| !deletes.iter().any(|d| d.pub_key == v.pub_key));
        if next.validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        next.update_total_voting_power()?;
        next.proposer = None;

        next.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR * next.total_voting_power);
        next.shift_by_avg_proposer_priority();
        next.validators.sort_by(|a, b| {
            b.voting_power
                .cmp(&a.voting_power)
                .then_with(|| a.pub_key.cmp(&b.pub_key))
        });

        *self = next;
        Ok(())
    }

    fn verify_removals(&self, deletes: &[Validator]) -> Result<i64, ValidatorSetError> {
        let mut removed = 0i64;
        for d in deletes {
            match self.get_by_address(&d.pub_key) {
                Some((_, v)) => removed += v.voting_power,
                None => return Err(ValidatorSetError::RemoveNonExistent(d.pub_key)),
            }
        }
        Ok(removed)
    }

    // Applies the deltas in ascending order so the check does not depend on
    // the order updates were given in.
    fn verify_updates(&self, updates: &[Validator], removed_power: i64) -> Result<i64, ValidatorSetError> {
        let mut deltas: Vec<i64> = updates
            .iter()
            .map(|u| match self.get_by_address(&u.pub_key) {
                Some((_, v)) => u.voting_power - v.voting_power,
                None => u.voting_power,
            })
            .collect();
        deltas.sort_unstable();

        let mut tvp = self.total_voting_power - removed_power;
        for delta in deltas {
            tvp += delta;
            if tvp > MAX_TOTAL_VOTING_POWER {
                return Err(ValidatorSetError::TotalPowerOverflow(tvp));
            }
        }
        Ok(tvp + removed_power)
    }

    fn compute_new_priorities(&self, updates: Vec<Validator>, tvp: i64) -> Vec<Validator> {
        updates
            .into_iter()
            .map(|mut u| {
                u.proposer_priority = match self.get_by_address(&u.pub_key) {
                    Some((_, existing)) => existing.proposer_priority,
                    // -1.125 * total: a newcomer waits before proposing.
                    None => -(tvp + (tvp >> 3)),
                };
                u
            })
            .collect()
    }

    fn update_total_voting_power(&mut self) -> Result<(), ValidatorSetError> {
        let mut sum = 0i64;
        for v in &self.validators {
            sum = sum
                .checked_add(v.voting_power)
                .filter(|s| *s <= MAX_TOTAL_VOTING_POWER)
                .ok_or(ValidatorSetError::TotalPowerOverflow(sum))?;
        }
        self.total_voting_power = sum;
        Ok(())
    }

    /// Check that `commit` carries +2/3 valid precommits from this set for
    /// `block_id` at `height`.
    pub fn verify_commit(
        &self,
        chain_id: &str,
        block_id: &BlockId,
        height: u64,
        commit: &Commit,
    ) -> Result<(), CommitError> {
        if self.len() != commit.signatures.len() {
            return Err(CommitError::WrongSetSize {
                expected: self.len(),
                got: commit.signatures.len(),
            });
        }
        if height != commit.height {
            return Err(CommitError::WrongHeight {
                expected: height,
                got: commit.height,
            });
        }
        if *block_id != commit.block_id {
            return Err(CommitError::WrongBlockId {
                expected: block_id.hash,
                got: commit.block_id.hash,
            });
        }

        let mut tallied = 0i64;
        for (idx, sig) in commit.signatures.iter().enumerate() {
            let (Some(address), Some(signature)) = (sig.validator_address(), sig.signature()) else {
                continue;
            };
            let validator = &self.validators[idx];
            if validator.pub_key != *address {
                return Err(CommitError::WrongValidator(idx));
            }
            let sign_bytes = commit
                .vote_sign_bytes(chain_id, idx)
                .ok_or(CommitError::InvalidSignature(idx))?;
            verify(&validator.pub_key, &sign_bytes, signature)
                .map_err(|_| CommitError::InvalidSignature(idx))?;
            if sig.for_block() {
                tallied += validator.voting_power;
            }
        }

        if !self.is_quorum(tallied) {
            return Err(CommitError::NotEnoughVotingPower {
                got: tallied,
                needed: self.total_voting_power * 2 / 3,
            });
        }
        Ok(())
    }
}

/// Split changes into updates and deletes, both sorted by address.
fn process_changes(changes: &[Validator]) -> Result<(Vec<Validator>, Vec<Validator>), ValidatorSetError> {
    let mut sorted = changes.to_vec();
    sorted.sort_by(|a, b| a.pub_key.cmp(&b.pub_key));

    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    let mut prev: Option<PublicKey> = None;
    for change in sorted {
        if prev == Some(change.pub_key) {
            return Err(ValidatorSetError::DuplicateEntry(change.pub_key));
        }
        prev = Some(change.pub_key);

        if change.voting_power < 0 {
            return Err(ValidatorSetError::NegativePower(change.pub_key, change.voting_power));
        }
        if change.voting_power > MAX_TOTAL_VOTING_POWER {
            return Err(ValidatorSetError::PowerTooHigh {
                address: change.pub_key,
                power: change.voting_power,
                max: MAX_TOTAL_VOTING_POWER,
            });
        }
        if change.voting_power == 0 {
            deletes.push(change);
        } else {
            updates.push(change);
        }
    }
    Ok((updates, deletes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_blake3, KeyPair, Sig};
    use crate::types::commit::CommitSig;
    use crate::types::vote::{Vote, VoteType};

    fn key(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[seed; 32])
    }

    fn set(powers: &[(u8, i64)]) -> ValidatorSet {
        ValidatorSet::new(
            powers
                .iter()
                .map(|(seed, power)| Validator::new(key(*seed).public, *power))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_sorted_by_power_then_address() {
        let vs = set(&[(1, 10), (2, 30), (3, 10)]);
        assert_eq!(vs.validators()[0].voting_power, 30);
        assert!(vs.validators()[1].pub_key < vs.validators()[2].pub_key);
        assert_eq!(vs.total_voting_power(), 50);
    }

    #[test]
    fn test_equal_power_rotates_through_everyone() {
        let mut vs = set(&[(1, 10), (2, 10), (3, 10), (4, 10)]);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..4 {
            seen.insert(vs.get_proposer().unwrap().pub_key);
            vs.increment_proposer_priority(1);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_proposer_frequency_follows_power() {
        let mut vs = set(&[(1, 1), (2, 3)]);
        let heavy = key(2).public;
        let mut heavy_count = 0;
        for _ in 0..400 {
            if vs.get_proposer().unwrap().pub_key == heavy {
                heavy_count += 1;
            }
            vs.increment_proposer_priority(1);
        }
        assert_eq!(heavy_count, 300);
    }

    #[test]
    fn test_copy_increment_matches_repeated_increment() {
        let vs = set(&[(1, 5), (2, 7), (3, 11)]);
        let mut stepped = vs.clone();
        stepped.increment_proposer_priority(1);
        stepped.increment_proposer_priority(1);
        stepped.increment_proposer_priority(1);
        let jumped = vs.copy_increment_proposer_priority(3);
        assert_eq!(
            stepped.get_proposer().unwrap().pub_key,
            jumped.get_proposer().unwrap().pub_key
        );
    }

    #[test]
    fn test_remove_and_add_in_one_change_set() {
        let mut vs = set(&[(1, 10)]);
        vs.update_with_change_set(&[Validator::new(key(1).public, 0), Validator::new(key(2).public, 50)])
            .unwrap();
        assert_eq!(vs.len(), 1);
        assert_eq!(vs.validators()[0].pub_key, key(2).public);
        assert_eq!(vs.total_voting_power(), 50);
    }

    #[test]
    fn test_removing_everyone_is_an_error() {
        let mut vs = set(&[(1, 10)]);
        let before = vs.clone();
        let err = vs
            .update_with_change_set(&[Validator::new(key(1).public, 0)])
            .unwrap_err();
        assert_eq!(err, ValidatorSetError::Empty);
        assert_eq!(vs, before);
    }

    #[test]
    fn test_invalid_changes_leave_set_untouched() {
        let mut vs = set(&[(1, 10), (2, 10)]);
        let before = vs.clone();

        assert!(matches!(
            vs.update_with_change_set(&[Validator::new(key(9).public, 0)]),
            Err(ValidatorSetError::RemoveNonExistent(_))
        ));
        assert!(matches!(
            vs.update_with_change_set(&[Validator::new(key(3).public, -1)]),
            Err(ValidatorSetError::NegativePower(_, -1))
        ));
        assert!(matches!(
            vs.update_with_change_set(&[
                Validator::new(key(3).public, 1),
                Validator::new(key(3).public, 2)
            ]),
            Err(ValidatorSetError::DuplicateEntry(_))
        ));
        assert!(matches!(
            vs.update_with_change_set(&[Validator::new(key(3).public, MAX_TOTAL_VOTING_POWER)]),
            Err(ValidatorSetError::TotalPowerOverflow(_))
        ));
        assert_eq!(vs, before);
    }

    #[test]
    fn test_new_validator_starts_behind() {
        let mut vs = set(&[(1, 10), (2, 10)]);
        vs.update_with_change_set(&[Validator::new(key(3).public, 10)]).unwrap();
        let newcomer = vs.get_by_address(&key(3).public).unwrap().1.proposer_priority;
        for v in vs.validators() {
            if v.pub_key != key(3).public {
                assert!(v.proposer_priority > newcomer);
            }
        }
    }

    #[test]
    fn test_zero_power_rejected_in_new_set() {
        let err = ValidatorSet::new(vec![Validator::new(key(1).public, 0)]).unwrap_err();
        assert!(matches!(err, ValidatorSetError::ZeroPower(_)));
    }

    #[test]
    fn test_hash_ignores_priority() {
        let vs = set(&[(1, 10), (2, 20)]);
        let rotated = vs.copy_increment_proposer_priority(5);
        assert_eq!(vs.hash(), rotated.hash());
        assert_ne!(vs.hash(), set(&[(1, 10), (2, 21)]).hash());
    }

    fn commit_for(vs: &ValidatorSet, block_id: BlockId, signers: usize) -> Commit {
        let signatures = vs
            .validators()
            .iter()
            .enumerate()
            .map(|(idx, v)| {
                if idx >= signers {
                    return CommitSig::Absent;
                }
                let kp = (1..=4u8).map(key).find(|k| k.public == v.pub_key).unwrap();
                let mut vote = Vote {
                    vote_type: VoteType::Precommit,
                    height: 2,
                    round: 0,
                    block_id,
                    timestamp: 100,
                    validator_address: v.pub_key,
                    validator_index: idx as u32,
                    signature: Sig::default(),
                };
                vote.sign("chain", &kp.secret);
                vote.to_commit_sig()
            })
            .collect();
        Commit {
            height: 2,
            round: 0,
            block_id,
            signatures,
        }
    }

    #[test]
    fn test_verify_commit() {
        let vs = set(&[(1, 10), (2, 10), (3, 10), (4, 10)]);
        let block_id = BlockId::new(hash_blake3(b"block"));

        vs.verify_commit("chain", &block_id, 2, &commit_for(&vs, block_id, 3))
            .unwrap();
        assert!(matches!(
            vs.verify_commit("chain", &block_id, 2, &commit_for(&vs, block_id, 2)),
            Err(CommitError::NotEnoughVotingPower { got: 20, .. })
        ));
        assert!(matches!(
            vs.verify_commit("other", &block_id, 2, &commit_for(&vs, block_id, 3)),
            Err(CommitError::InvalidSignature(0))
        ));
        assert!(matches!(
            vs.verify_commit("chain", &block_id, 3, &commit_for(&vs, block_id, 3)),
            Err(CommitError::WrongHeight { .. })
        ));
    }
}
