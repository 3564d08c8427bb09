// Consensus parameters shared by every node of a network

use crate::core::TRANSACTION_FEE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Leading zero bits every block hash must have
    pub difficulty: u32,
    /// Newly minted coins per block, on top of collected fees
    pub block_subsidy: u64,
}

impl ChainParams {
    pub fn new(difficulty: u32, block_subsidy: u64) -> Self {
        Self {
            difficulty,
            block_subsidy,
        }
    }

    /// Coinbase amount for a block carrying `transfer_count` fee-paying transactions
    pub fn block_reward(&self, transfer_count: usize) -> u64 {
        self.block_subsidy + TRANSACTION_FEE * transfer_count as u64
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::new(8, 2)
    }
}
