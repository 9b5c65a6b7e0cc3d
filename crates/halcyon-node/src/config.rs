use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use halcyon_consensus::ConsensusConfig;
use halcyon_core::{ConsensusParams, GenesisDoc, GenesisValidator, KeyPair, SecretKey};
use halcyon_mempool::MempoolConfig;
use halcyon_proxy::Transport;
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node data directory
    pub data_dir: PathBuf,

    /// Application to drive: `kvstore` or `noop` run in-process, anything
    /// else is the address of an application server
    pub proxy_app: String,

    /// Wire transport for a remote application
    #[serde(default)]
    pub transport: Transport,

    /// Keep retrying until the remote application accepts the connection
    #[serde(default = "default_must_connect")]
    pub must_connect: bool,

    /// Default log filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub mempool: MempoolConfig,

    /// Validator private key (hex) - only for validator nodes
    pub validator_key: Option<String>,

    /// Genesis document; carries the chain ID
    pub genesis: GenesisDoc,
}

fn default_must_connect() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("./halcyon-data"),
            proxy_app: "kvstore".to_string(),
            transport: Transport::Socket,
            must_connect: true,
            log_level: default_log_level(),
            consensus: ConsensusConfig::default(),
            mempool: MempoolConfig::default(),
            validator_key: None,
            genesis: GenesisDoc {
                genesis_time: 0,
                chain_id: "halcyon-local".to_string(),
                initial_height: 1,
                consensus_params: ConsensusParams::default(),
                validators: vec![],
                app_hash: vec![],
                app_state: serde_json::Value::Null,
            },
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn chain_id(&self) -> &str {
        &self.genesis.chain_id
    }

    /// The genesis document, checked and with defaults filled in.
    pub fn genesis_doc(&self) -> Result<GenesisDoc> {
        let mut doc = self.genesis.clone();
        doc.validate_and_complete()
            .map_err(|e| anyhow!("invalid genesis: {}", e))?;
        Ok(doc)
    }

    pub fn validator_keypair(&self) -> Result<Option<KeyPair>> {
        match &self.validator_key {
            Some(key_hex) => Ok(Some(KeyPair::from_secret(SecretKey::from_hex(key_hex)?))),
            None => Ok(None),
        }
    }

    /// Write-ahead log location, inside the data directory unless the
    /// consensus section names one.
    pub fn wal_path(&self) -> PathBuf {
        self.consensus
            .wal_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cs.wal"))
    }
}

/// Generate a single-validator configuration running the built-in kvstore
pub fn generate_sample_config(chain_id: &str) -> NodeConfig {
    let validator = KeyPair::generate();

    let mut config = NodeConfig::default();
    config.genesis.chain_id = chain_id.to_string();
    config.genesis.genesis_time = halcyon_core::time::now_millis();
    config.genesis.validators = vec![GenesisValidator {
        pub_key: validator.public,
        power: 10,
        name: "validator-0".to_string(),
    }];
    config.validator_key = Some(validator.secret.to_hex());
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.chain_id(), "halcyon-local");
        assert_eq!(config.proxy_app, "kvstore");
        assert!(config.validator_key.is_none());
        assert_eq!(config.wal_path(), PathBuf::from("./halcyon-data/cs.wal"));
    }

    #[test]
    fn test_sample_config() {
        let config = generate_sample_config("test-chain");
        assert_eq!(config.genesis.validators.len(), 1);
        let key = config.validator_keypair().unwrap().unwrap();
        assert_eq!(key.public, config.genesis.validators[0].pub_key);
    }

    #[test]
    fn test_genesis_conversion() {
        let config = generate_sample_config("test-chain");
        let genesis = config.genesis_doc().unwrap();
        assert_eq!(genesis.chain_id, "test-chain");
        assert_eq!(genesis.initial_height, 1);
        assert_eq!(genesis.validator_set().unwrap().validators().len(), 1);
    }

    #[test]
    fn test_invalid_genesis_rejected() {
        let mut config = generate_sample_config("test-chain");
        config.genesis.validators[0].power = 0;
        assert!(config.genesis_doc().is_err());

        let mut config = generate_sample_config("");
        config.genesis.chain_id.clear();
        assert!(config.genesis_doc().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("halcyon-node-config-{}.json", std::process::id()));
        let mut config = generate_sample_config("saved-chain");
        config.proxy_app = "tcp://127.0.0.1:26658".to_string();
        config.transport = Transport::Http;
        config.consensus.skip_timeout_commit = true;
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.chain_id(), "saved-chain");
        assert_eq!(loaded.transport, Transport::Http);
        assert_eq!(loaded.validator_key, config.validator_key);
        assert_eq!(loaded.consensus, config.consensus);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_bad_validator_key() {
        let config = NodeConfig {
            validator_key: Some("not-hex".to_string()),
            ..Default::default()
        };
        assert!(config.validator_keypair().is_err());
    }
}
