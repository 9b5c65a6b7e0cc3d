use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::crypto::{Hash, PublicKey};
use crate::error::CoreError;
use crate::serialize;
use crate::time::now_millis;
use crate::types::block::MAX_CHAIN_ID_LEN;
use crate::types::params::ConsensusParams;
use crate::types::validator::{Validator, ValidatorSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub pub_key: PublicKey,
    pub power: i64,
    #[serde(default)]
    pub name: String,
}

/// Genesis document: the initial conditions of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisDoc {
    /// Milliseconds since the Unix epoch; filled with the current time if 0
    #[serde(default)]
    pub genesis_time: u64,
    pub chain_id: String,
    #[serde(default)]
    pub initial_height: u64,
    #[serde(default)]
    pub consensus_params: ConsensusParams,
    /// May be empty when the application supplies the set at InitChain
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub app_hash: Vec<u8>,
    #[serde(default)]
    pub app_state: serde_json::Value,
}

impl GenesisDoc {
    /// Check the document and fill in defaults.
    pub fn validate_and_complete(&mut self) -> Result<(), CoreError> {
        if self.chain_id.is_empty() {
            return Err(CoreError::InvalidGenesis("chain_id must not be empty".into()));
        }
        if self.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(CoreError::InvalidGenesis(format!(
                "chain_id longer than {} characters",
                MAX_CHAIN_ID_LEN
            )));
        }
        if self.initial_height == 0 {
            self.initial_height = 1;
        }
        self.consensus_params.validate()?;
        for (i, v) in self.validators.iter().enumerate() {
            if v.power <= 0 {
                return Err(CoreError::InvalidGenesis(format!(
                    "validator {} ({}) has non-positive power {}",
                    i, v.pub_key, v.power
                )));
            }
        }
        if self.genesis_time == 0 {
            self.genesis_time = now_millis();
        }
        Ok(())
    }

    pub fn validator_set(&self) -> Result<ValidatorSet, CoreError> {
        if self.validators.is_empty() {
            return Ok(ValidatorSet::default());
        }
        let validators = self
            .validators
            .iter()
            .map(|v| Validator::new(v.pub_key, v.power))
            .collect();
        Ok(ValidatorSet::new(validators)?)
    }

    pub fn app_state_bytes(&self) -> Result<Vec<u8>, CoreError> {
        if self.app_state.is_null() {
            return Ok(Vec::new());
        }
        serde_json::to_vec(&self.app_state).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Hash of the document, stored to detect a changed genesis file.
    pub fn hash(&self) -> Result<Hash, CoreError> {
        let json = serialize::to_json_pretty(self)?;
        Ok(crate::crypto::hash_blake3(json.as_bytes()))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)?;
        let mut doc: GenesisDoc = serialize::from_json(&contents)?;
        doc.validate_and_complete()?;
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        std::fs::write(path, serialize::to_json_pretty(self)?)?;
        Ok(())
    }
}
