//! Validator signing with double-sign protection.
//!
//! The signer remembers the last (height, round, step) it signed and
//! refuses to sign anything earlier. Asked to sign the same step again it
//! returns the earlier signature when only the timestamp differs.

use std::fs;
use std::path::{Path, PathBuf};

use halcyon_core::{sign, KeyPair, Proposal, PublicKey, Sig, Vote, VoteType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SignerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignStep {
    Propose,
    Prevote,
    Precommit,
}

impl From<VoteType> for SignStep {
    fn from(vote_type: VoteType) -> Self {
        match vote_type {
            VoteType::Prevote => SignStep::Prevote,
            VoteType::Precommit => SignStep::Precommit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSignState {
    pub height: u64,
    pub round: u32,
    pub step: Option<SignStep>,
    pub signature: Option<Sig>,
    pub sign_bytes: Vec<u8>,
    pub timestamp: u64,
}

impl LastSignState {
    /// Errors when (height, round, step) is behind the last signature.
    /// `Ok(true)` means it is the same one.
    fn check_hrs(&self, height: u64, round: u32, step: SignStep) -> Result<bool, SignerError> {
        if self.height > height {
            return Err(SignerError::HeightRegression {
                last: self.height,
                requested: height,
            });
        }
        if self.height < height {
            return Ok(false);
        }
        if self.round > round {
            return Err(SignerError::RoundRegression {
                height,
                last: self.round,
                requested: round,
            });
        }
        if self.round < round {
            return Ok(false);
        }
        match self.step {
            Some(last) if last > step => Err(SignerError::StepRegression {
                height,
                round,
                last,
                requested: step,
            }),
            Some(last) if last == step => Ok(self.signature.is_some()),
            _ => Ok(false),
        }
    }
}

pub struct Signer {
    key: KeyPair,
    last: LastSignState,
    state_path: Option<PathBuf>,
}

impl Signer {
    /// Signer whose last sign state lives only in memory.
    pub fn new(key: KeyPair) -> Self {
        Signer {
            key,
            last: LastSignState::default(),
            state_path: None,
        }
    }

    /// Signer that persists its last sign state as JSON at `path`, loading
    /// it when the file exists.
    pub fn load_or_create(key: KeyPair, path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let path = path.as_ref().to_path_buf();
        let last = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            LastSignState::default()
        };
        let signer = Signer {
            key,
            last,
            state_path: Some(path),
        };
        signer.save()?;
        Ok(signer)
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public
    }

    pub fn last_sign_state(&self) -> &LastSignState {
        &self.last
    }

    pub fn sign_vote(&mut self, chain_id: &str, vote: &mut Vote) -> Result<(), SignerError> {
        let step = SignStep::from(vote.vote_type);
        let sign_bytes = vote.sign_bytes(chain_id);

        if self.last.check_hrs(vote.height, vote.round, step)? {
            let mut previous = vote.clone();
            previous.timestamp = self.last.timestamp;
            let (timestamp, signature) =
                self.reuse(vote.height, vote.round, step, &sign_bytes, &previous.sign_bytes(chain_id))?;
            vote.timestamp = timestamp;
            vote.signature = signature;
            return Ok(());
        }

        let signature = sign(&self.key.secret, &sign_bytes);
        self.record(vote.height, vote.round, step, signature, sign_bytes, vote.timestamp)?;
        vote.signature = signature;
        Ok(())
    }

    pub fn sign_proposal(&mut self, chain_id: &str, proposal: &mut Proposal) -> Result<(), SignerError> {
        let step = SignStep::Propose;
        let sign_bytes = proposal.sign_bytes(chain_id);

        if self.last.check_hrs(proposal.height, proposal.round, step)? {
            let mut previous = proposal.clone();
            previous.timestamp = self.last.timestamp;
            let (timestamp, signature) = self.reuse(
                proposal.height,
                proposal.round,
                step,
                &sign_bytes,
                &previous.sign_bytes(chain_id),
            )?;
            proposal.timestamp = timestamp;
            proposal.signature = signature;
            return Ok(());
        }

        let signature = sign(&self.key.secret, &sign_bytes);
        self.record(
            proposal.height,
            proposal.round,
            step,
            signature,
            sign_bytes,
            proposal.timestamp,
        )?;
        proposal.signature = signature;
        Ok(())
    }

    /// Signature of an already signed step. `with_last_timestamp` are the
    /// requested sign bytes with the stored timestamp substituted.
    fn reuse(
        &self,
        height: u64,
        round: u32,
        step: SignStep,
        sign_bytes: &[u8],
        with_last_timestamp: &[u8],
    ) -> Result<(u64, Sig), SignerError> {
        let conflicting = SignerError::ConflictingData {
            height,
            round,
            step,
        };
        let Some(signature) = self.last.signature else {
            return Err(conflicting);
        };
        if sign_bytes == self.last.sign_bytes.as_slice() || with_last_timestamp == self.last.sign_bytes.as_slice() {
            debug!(height, round, ?step, "re-using earlier signature");
            return Ok((self.last.timestamp, signature));
        }
        Err(conflicting)
    }

    fn record(
        &mut self,
        height: u64,
        round: u32,
        step: SignStep,
        signature: Sig,
        sign_bytes: Vec<u8>,
        timestamp: u64,
    ) -> Result<(), SignerError> {
        self.last = LastSignState {
            height,
            round,
            step: Some(step),
            signature: Some(signature),
            sign_bytes,
            timestamp,
        };
        self.save()
    }

    fn save(&self) -> Result<(), SignerError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.last)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_core::{hash_blake3, BlockId};

    fn vote(vote_type: VoteType, height: u64, round: u32, block_id: BlockId, timestamp: u64) -> Vote {
        Vote {
            vote_type,
            height,
            round,
            block_id,
            timestamp,
            validator_address: KeyPair::from_secret_bytes(&[7; 32]).public,
            validator_index: 0,
            signature: Sig::default(),
        }
    }

    fn signer() -> Signer {
        Signer::new(KeyPair::from_secret_bytes(&[7; 32]))
    }

    #[test]
    fn test_sign_and_verify() {
        let mut signer = signer();
        let mut v = vote(VoteType::Prevote, 1, 0, BlockId::nil(), 10);
        signer.sign_vote("c", &mut v).unwrap();
        v.verify("c", &signer.public_key()).unwrap();
    }

    #[test]
    fn test_regressions_refused() {
        let mut signer = signer();
        signer
            .sign_vote("c", &mut vote(VoteType::Precommit, 5, 2, BlockId::nil(), 10))
            .unwrap();

        assert!(matches!(
            signer.sign_vote("c", &mut vote(VoteType::Prevote, 4, 9, BlockId::nil(), 10)),
            Err(SignerError::HeightRegression { .. })
        ));
        assert!(matches!(
            signer.sign_vote("c", &mut vote(VoteType::Precommit, 5, 1, BlockId::nil(), 10)),
            Err(SignerError::RoundRegression { .. })
        ));
        assert!(matches!(
            signer.sign_vote("c", &mut vote(VoteType::Prevote, 5, 2, BlockId::nil(), 10)),
            Err(SignerError::StepRegression { .. })
        ));
    }

    #[test]
    fn test_same_step_reuses_signature_or_refuses_conflict() {
        let mut signer = signer();
        let block = BlockId::new(hash_blake3(b"a"));
        let mut first = vote(VoteType::Precommit, 3, 0, block, 100);
        signer.sign_vote("c", &mut first).unwrap();

        let mut later = vote(VoteType::Precommit, 3, 0, block, 250);
        signer.sign_vote("c", &mut later).unwrap();
        assert_eq!(later.timestamp, 100);
        assert_eq!(later.signature, first.signature);

        let mut other = vote(VoteType::Precommit, 3, 0, BlockId::nil(), 100);
        assert!(matches!(
            signer.sign_vote("c", &mut other),
            Err(SignerError::ConflictingData { .. })
        ));
    }

    #[test]
    fn test_proposal_then_votes_same_round() {
        let mut signer = signer();
        let block = BlockId::new(hash_blake3(b"p"));
        let mut proposal = Proposal::new(2, 0, None, block, 10);
        signer.sign_proposal("c", &mut proposal).unwrap();
        proposal.verify("c", &signer.public_key()).unwrap();

        signer
            .sign_vote("c", &mut vote(VoteType::Prevote, 2, 0, block, 11))
            .unwrap();
        let mut again = Proposal::new(2, 0, None, block, 12);
        assert!(matches!(
            signer.sign_proposal("c", &mut again),
            Err(SignerError::StepRegression { .. })
        ));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = std::env::temp_dir().join(format!("halcyon-signer-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("signer_state.json");
        let key = KeyPair::from_secret_bytes(&[7; 32]);
        {
            let mut signer = Signer::load_or_create(key.clone(), &path).unwrap();
            signer
                .sign_vote("c", &mut vote(VoteType::Prevote, 8, 1, BlockId::nil(), 10))
                .unwrap();
        }
        let mut signer = Signer::load_or_create(key, &path).unwrap();
        assert_eq!(signer.last_sign_state().height, 8);
        assert!(matches!(
            signer.sign_vote("c", &mut vote(VoteType::Prevote, 8, 0, BlockId::nil(), 10)),
            Err(SignerError::RoundRegression { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
