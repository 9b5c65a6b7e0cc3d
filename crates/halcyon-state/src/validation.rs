use halcyon_core::Block;

use crate::error::ValidationError;
use crate::evidence::EvidencePool;
use crate::state::{median_time, State};

fn check_hash(field: &'static str, expected: impl AsRef<[u8]>, got: impl AsRef<[u8]>) -> Result<(), ValidationError> {
    if expected.as_ref() == got.as_ref() {
        return Ok(());
    }
    Err(ValidationError::WrongHash {
        field,
        expected: hex_short(expected.as_ref()),
        got: hex_short(got.as_ref()),
    })
}

fn hex_short(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Everything a block must satisfy to be executed on top of `state`. No
/// application call is made.
pub fn validate_block(
    state: &State,
    block: &Block,
    evidence_pool: &dyn EvidencePool,
) -> Result<(), ValidationError> {
    block.validate_basic()?;
    let header = &block.header;

    if header.version != state.version {
        return Err(ValidationError::WrongVersion {
            expected: (state.version.block, state.version.app),
            got: (header.version.block, header.version.app),
        });
    }
    if header.chain_id != state.chain_id {
        return Err(ValidationError::WrongChainId {
            expected: state.chain_id.clone(),
            got: header.chain_id.clone(),
        });
    }
    if header.height != state.next_height() {
        return Err(ValidationError::WrongHeight {
            expected: state.next_height(),
            got: header.height,
        });
    }

    check_hash(
        "last block id",
        state.last_block_id.hash.as_bytes(),
        header.last_block_id.hash.as_bytes(),
    )?;
    check_hash("app hash", &state.app_hash, &header.app_hash)?;
    check_hash(
        "consensus hash",
        state.consensus_params.hash().as_bytes(),
        header.consensus_hash.as_bytes(),
    )?;
    check_hash(
        "last results hash",
        state.last_results_hash.as_bytes(),
        header.last_results_hash.as_bytes(),
    )?;
    check_hash(
        "validators hash",
        state.validators.hash().as_bytes(),
        header.validators_hash.as_bytes(),
    )?;
    check_hash(
        "next validators hash",
        state.next_validators.hash().as_bytes(),
        header.next_validators_hash.as_bytes(),
    )?;

    if header.height == state.initial_height {
        if !block.last_commit.is_empty() {
            return Err(ValidationError::InitialLastCommitNotEmpty);
        }
        if header.time != state.last_block_time {
            return Err(ValidationError::WrongTime {
                expected: state.last_block_time,
                got: header.time,
            });
        }
    } else {
        state.last_validators.verify_commit(
            &state.chain_id,
            &state.last_block_id,
            header.height - 1,
            &block.last_commit,
        )?;
        if header.time <= state.last_block_time {
            return Err(ValidationError::TimeNotMonotonic {
                got: header.time,
                last: state.last_block_time,
            });
        }
        let expected = median_time(&block.last_commit, &state.last_validators);
        if header.time != expected {
            return Err(ValidationError::WrongTime {
                expected,
                got: header.time,
            });
        }
    }

    if !state.validators.has_address(&header.proposer_address) {
        return Err(ValidationError::UnknownProposer(header.proposer_address.to_hex()));
    }

    let evidence_bytes: i64 = block.evidence.iter().map(|ev| ev.bytes().len() as i64).sum();
    let max = state.consensus_params.evidence.max_bytes;
    if evidence_bytes > max {
        return Err(ValidationError::EvidenceTooLarge {
            got: evidence_bytes,
            max,
        });
    }
    evidence_pool.check_evidence(state, &block.evidence)
}
