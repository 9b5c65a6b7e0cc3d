use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash, KEY_TYPE_ED25519};
use crate::error::CoreError;
use crate::serialize::CanonicalEncoder;

/// Hard ceiling for `BlockParams::max_bytes` (100 MiB).
pub const MAX_BLOCK_SIZE_BYTES: i64 = 104_857_600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    pub max_bytes: i64,
    /// -1 means unlimited
    pub max_gas: i64,
    /// Minimum spacing between consecutive block times
    pub time_iota_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    pub max_age_num_blocks: u64,
    pub max_age_duration_ms: u64,
    pub max_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorParams {
    pub pub_key_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionParams {
    pub app_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub evidence: EvidenceParams,
    pub validator: ValidatorParams,
    pub version: VersionParams,
}

/// Partial update returned by the application; absent parts are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsensusParamsUpdate {
    pub block: Option<BlockParams>,
    pub evidence: Option<EvidenceParams>,
    pub validator: Option<ValidatorParams>,
    pub version: Option<VersionParams>,
}

impl ConsensusParamsUpdate {
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
            && self.evidence.is_none()
            && self.validator.is_none()
            && self.version.is_none()
    }
}

impl Default for BlockParams {
    fn default() -> Self {
        BlockParams {
            max_bytes: 22_020_096,
            max_gas: -1,
            time_iota_ms: 1000,
        }
    }
}

impl Default for EvidenceParams {
    fn default() -> Self {
        EvidenceParams {
            max_age_num_blocks: 100_000,
            max_age_duration_ms: 48 * 60 * 60 * 1000,
            max_bytes: 1_048_576,
        }
    }
}

impl Default for ValidatorParams {
    fn default() -> Self {
        ValidatorParams {
            pub_key_types: vec![KEY_TYPE_ED25519.to_string()],
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            block: BlockParams::default(),
            evidence: EvidenceParams::default(),
            validator: ValidatorParams::default(),
            version: VersionParams::default(),
        }
    }
}

impl ConsensusParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: String| Err(CoreError::InvalidParams(msg));
        if self.block.max_bytes <= 0 || self.block.max_bytes > MAX_BLOCK_SIZE_BYTES {
            return invalid(format!(
                "block.max_bytes must be in (0, {}], got {}",
                MAX_BLOCK_SIZE_BYTES, self.block.max_bytes
            ));
        }
        if self.block.max_gas < -1 {
            return invalid(format!("block.max_gas must be >= -1, got {}", self.block.max_gas));
        }
        if self.block.time_iota_ms == 0 {
            return invalid("block.time_iota_ms must be positive".into());
        }
        if self.evidence.max_age_num_blocks == 0 || self.evidence.max_age_duration_ms == 0 {
            return invalid("evidence max age must be positive".into());
        }
        if self.evidence.max_bytes < 0 || self.evidence.max_bytes > self.block.max_bytes {
            return invalid(format!(
                "evidence.max_bytes must be in [0, block.max_bytes], got {}",
                self.evidence.max_bytes
            ));
        }
        if self.validator.pub_key_types.is_empty() {
            return invalid("validator.pub_key_types must not be empty".into());
        }
        for key_type in &self.validator.pub_key_types {
            if key_type != KEY_TYPE_ED25519 {
                return invalid(format!("unknown pub key type {}", key_type));
            }
        }
        Ok(())
    }

    pub fn is_allowed_pub_key_type(&self, key_type: &str) -> bool {
        self.validator.pub_key_types.iter().any(|t| t == key_type)
    }

    /// Only the block size and gas limits are committed to in headers.
    pub fn hash(&self) -> Hash {
        hash_blake3(
            &CanonicalEncoder::new()
                .i64(self.block.max_bytes)
                .i64(self.block.max_gas)
                .finish(),
        )
    }

    /// Field-wise merge of an application update.
    pub fn update(&self, update: &ConsensusParamsUpdate) -> ConsensusParams {
        let mut next = self.clone();
        if let Some(block) = &update.block {
            next.block = block.clone();
        }
        if let Some(evidence) = &update.evidence {
            next.evidence = evidence.clone();
        }
        if let Some(validator) = &update.validator {
            next.validator = validator.clone();
        }
        if let Some(version) = &update.version {
            next.version = version.clone();
        }
        next
    }
}
