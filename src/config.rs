// Simulation configuration

use crate::consensus::ChainParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Shape and pacing of one simulated network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub nodes: usize,
    pub miners: usize,
    pub wallets: usize,
    /// Each node links to the next this many nodes in a ring
    pub peer_connections: usize,
    /// Nodes each miner may submit to
    pub miner_peers: usize,
    /// Nodes each wallet may pay through
    pub wallet_peers: usize,
    /// Leading zero bits required of a block hash
    pub difficulty: u32,
    pub block_subsidy: u64,
    /// Genesis allocation per wallet
    pub initial_balance: u64,
    /// Pause between nonces, to keep block times observable
    pub pow_delay_ms: u64,
    pub tx_interval_ms: u64,
    pub max_tx_amount: u64,
    pub duration_secs: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 10,
            miners: 2,
            wallets: 3,
            peer_connections: 3,
            miner_peers: 2,
            wallet_peers: 2,
            difficulty: 8,
            block_subsidy: 2,
            initial_balance: 100,
            pow_delay_ms: 1,
            tx_interval_ms: 500,
            max_tx_amount: 10,
            duration_secs: 10,
        }
    }
}

impl SimConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes == 0 {
            return Err(invalid("nodes", "at least one node is required"));
        }
        if self.peer_connections >= self.nodes && self.nodes > 1 {
            return Err(invalid(
                "peer_connections",
                format!("must be below the node count ({})", self.nodes),
            ));
        }
        if self.miners > 0 && self.miner_peers == 0 {
            return Err(invalid("miner_peers", "a miner needs at least one node"));
        }
        if self.wallets > 0 && self.wallet_peers == 0 {
            return Err(invalid("wallet_peers", "a wallet needs at least one node"));
        }
        if self.difficulty > 256 {
            return Err(invalid("difficulty", format!("{} exceeds 256 bits", self.difficulty)));
        }
        if self.wallets > 1 && self.max_tx_amount == 0 {
            return Err(invalid("max_tx_amount", "must be positive"));
        }
        if self.tx_interval_ms == 0 {
            return Err(invalid("tx_interval_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams::new(self.difficulty, self.block_subsidy)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
