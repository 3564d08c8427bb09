// Proof-of-work cryptocurrency network simulator
// UTXO ledger, competing miners and longest-chain gossip between in-process nodes

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod network;
pub mod simulation;
pub mod storage;
pub mod wallet;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use cli::{Cli, CliHandler};
pub use config::{ConfigError, SimConfig};
pub use consensus::{BlockValidator, ChainParams, Miner, MinerError, ProofOfWork, ValidationError};
pub use crate::core::{Address, Block, BlockHeader, Hash256, Transaction, TxOutput};
pub use network::{Network, Node, NodeId, Peer};
pub use simulation::{SimError, SimReport, Simulation};
pub use storage::{ChainError, ChainState, OutPoint, Utxo, UtxoSet};
pub use wallet::{KeyPair, Wallet, WalletError};
