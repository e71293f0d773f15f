use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tessera_consensus::ChronologyConfig;
use tessera_core::{Address, GenesisConfig, KeyPair, MultiSigKeyPair, MultiSigPublicKey, SecretKey};
use tessera_vm::ExecutionPolicy;

use crate::txgen::parse_amount;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node data directory
    pub data_dir: PathBuf,

    /// Ed25519 secret key (hex); the multi-signature key is derived from it
    pub signer_key: String,

    /// Genesis configuration
    pub genesis: GenesisConfigFile,

    /// Phase durations
    #[serde(default)]
    pub chronology: ChronologyConfig,

    #[serde(default)]
    pub execution: ExecutionPolicy,

    /// Multi-signature public keys (hex) allowed to sign blocks; empty
    /// accepts any signer
    #[serde(default)]
    pub consensus_group: Vec<String>,
}

/// Genesis configuration for file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfigFile {
    /// Unix time in milliseconds
    pub timestamp: u64,
    /// Address hex
    pub mint_address: String,
    /// Decimal string, arbitrary precision
    pub mint_balance: String,
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

    pub fn signer_keypair(&self) -> Result<KeyPair> {
        let secret = SecretKey::from_hex(&self.signer_key).map_err(|e| anyhow!(e))?;
        Ok(KeyPair::from_secret(secret))
    }

    /// Convert genesis config to core type
    pub fn to_genesis_config(&self) -> Result<GenesisConfig> {
        let mint_address =
            Address::from_hex(&self.genesis.mint_address).map_err(|e| anyhow!(e))?;
        Ok(GenesisConfig::new(
            self.genesis.timestamp,
            mint_address,
            parse_amount(&self.genesis.mint_balance)?,
        ))
    }

    pub fn consensus_group(&self) -> Result<Vec<MultiSigPublicKey>> {
        self.consensus_group
            .iter()
            .map(|s| MultiSigPublicKey::from_hex(s).map_err(|e| anyhow!(e)))
            .collect()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Generate a sample configuration for testing
///
/// The signer also holds the minted supply and forms a consensus group of one.
pub fn generate_sample_config() -> NodeConfig {
    let signer = KeyPair::generate();
    let multisig = MultiSigKeyPair::from_keypair(&signer);

    NodeConfig {
        data_dir: PathBuf::from("./tessera-data"),
        signer_key: signer.secret.to_hex(),
        genesis: GenesisConfigFile {
            timestamp: now_ms(),
            mint_address: Address::from_public_key(&signer.public).to_hex(),
            mint_balance: "1000000000000000000000000".into(),
        },
        chronology: ChronologyConfig::default(),
        execution: ExecutionPolicy::default(),
        consensus_group: vec![multisig.public.to_hex()],
    }
}
