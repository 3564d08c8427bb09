// Shared helpers for unit tests

use crate::consensus::ProofOfWork;
use crate::core::{Address, Block, Transaction};
use crate::storage::{BlockTemplate, UtxoSet};
use crate::wallet::{KeyPair, TransactionBuilder, WalletError};

/// Search nonces until the block meets its own difficulty
pub fn solve(mut block: Block) -> Block {
    let result = ProofOfWork::new(block.header.difficulty).mine(&mut block.header, || false);
    assert!(result.is_solved(), "nonce space exhausted");
    block
}

/// Turn a template into a solved block paying `miner`
pub fn mine(template: BlockTemplate, miner: &Address) -> Block {
    solve(template.into_block(miner))
}

/// Signed payment from `from` using outputs in `utxos`
pub fn pay(from: &KeyPair, to: &Address, amount: u64, utxos: &UtxoSet) -> Result<Transaction, WalletError> {
    TransactionBuilder::new(from, utxos).build(to, amount)
}
