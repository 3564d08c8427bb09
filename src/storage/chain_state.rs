// Per-node ledger state: canonical chain, derived UTXO set and mempool

use crate::consensus::{ChainParams, TransactionValidator, ValidationError};
use crate::core::{Address, Block, Hash256, Transaction};
use crate::storage::{Mempool, OutPoint, Utxo, UtxoSet};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Ledger state-transition failures. Any of these leaves the state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block does not extend tip {tip}")]
    NotOnTip { tip: Hash256 },
    #[error("Wrong block height: expected {expected}, found {found}")]
    WrongHeight { expected: u64, found: u64 },
    #[error("Transaction {0} is not in the mempool")]
    NotInMempool(Hash256),
    #[error("Transaction {txid} is invalid: {reason}")]
    InvalidTransaction { txid: Hash256, reason: ValidationError },
    #[error("Input {}:{} is not unspent", .0.txid, .0.index)]
    MissingInput(OutPoint),
    #[error("Input {}:{} does not match the stored output", .0.txid, .0.index)]
    InputMismatch(OutPoint),
    #[error("Input {}:{} spent twice in one block", .0.txid, .0.index)]
    DoubleSpend(OutPoint),
    #[error("Candidate chain does not start at the local genesis block")]
    GenesisMismatch,
    #[error("Broken previous-hash link at height {0}")]
    BrokenLink(u64),
    #[error("Invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: ValidationError },
}

/// Everything a miner needs to assemble a candidate block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub prev_hash: Hash256,
    pub height: u64,
    pub params: ChainParams,
    /// Mempool transactions that connect to the current UTXO set
    pub transactions: Vec<Transaction>,
}

impl BlockTemplate {
    /// Unsolved block paying `subsidy + fee * transfers` to `miner`
    pub fn into_block(self, miner: &Address) -> Block {
        let reward = self.params.block_reward(self.transactions.len());
        let mut transactions = Vec::with_capacity(self.transactions.len() + 1);
        transactions.push(Transaction::coinbase(miner.clone(), reward, self.height));
        transactions.extend(self.transactions);
        Block::new(self.prev_hash, transactions, self.params.difficulty, self.height)
    }
}

/// Canonical chain plus the UTXO set implied by replaying it on top of the
/// genesis allocations. Every mutation of one is paired with the other.
#[derive(Debug, Clone)]
pub struct ChainState {
    params: ChainParams,
    chain: Vec<Block>,
    /// block hash -> height
    index: HashMap<Hash256, usize>,
    utxo_set: UtxoSet,
    genesis_utxos: UtxoSet,
    mempool: Mempool,
}

impl ChainState {
    pub fn new(params: ChainParams) -> Self {
        let genesis = Block::genesis();
        let mut index = HashMap::new();
        index.insert(genesis.hash(), 0);

        Self {
            params,
            chain: vec![genesis],
            index,
            utxo_set: UtxoSet::new(),
            genesis_utxos: UtxoSet::new(),
            mempool: Mempool::new(),
        }
    }

    /// Seed initial balances. Must happen before any block is appended.
    pub fn add_genesis_utxos(&mut self, utxos: impl IntoIterator<Item = Utxo>) {
        for utxo in utxos {
            self.genesis_utxos.add_utxo(utxo.clone());
            self.utxo_set.add_utxo(utxo);
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    pub fn genesis_utxos(&self) -> &UtxoSet {
        &self.genesis_utxos
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn genesis(&self) -> &Block {
        &self.chain[0]
    }

    pub fn tip(&self) -> &Block {
        // Never empty: genesis is always present
        &self.chain[self.chain.len() - 1]
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.tip().hash()
    }

    /// Height of the tip block
    pub fn height(&self) -> u64 {
        (self.chain.len() - 1) as u64
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.index.contains_key(hash)
    }

    /// Position of a block in the canonical chain
    pub fn position(&self, hash: &Hash256) -> Option<usize> {
        self.index.get(hash).copied()
    }

    pub fn get_block(&self, hash: &Hash256) -> Option<&Block> {
        self.position(hash).map(|pos| &self.chain[pos])
    }

    pub fn balance(&self, owner: &Address) -> u64 {
        self.utxo_set.get_balance(owner)
    }

    /// Add a transaction to the mempool; `false` if already pending
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        self.mempool.insert(tx)
    }

    /// Append a block on top of the tip.
    ///
    /// Every transfer must be pending in the mempool, pass verification and
    /// spend only existing UTXOs of its sender. Proof-of-work and reward are
    /// the caller's concern. On error nothing is mutated.
    pub fn append_block(&mut self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip_hash();
        if block.prev_hash() != tip {
            return Err(ChainError::NotOnTip { tip });
        }
        let expected = self.height() + 1;
        if block.height() != expected {
            return Err(ChainError::WrongHeight {
                expected,
                found: block.height(),
            });
        }

        let mut spent: HashSet<OutPoint> = HashSet::new();
        for tx in block.transfers() {
            if !self.mempool.contains(&tx.txid) {
                return Err(ChainError::NotInMempool(tx.txid));
            }
            TransactionValidator::validate_for_mempool(tx).map_err(|reason| {
                ChainError::InvalidTransaction {
                    txid: tx.txid,
                    reason,
                }
            })?;

            for input in &tx.inputs {
                let outpoint = input.outpoint();
                match self.utxo_set.get_utxo(&outpoint) {
                    None => return Err(ChainError::MissingInput(outpoint)),
                    Some(stored) if stored != input => {
                        return Err(ChainError::InputMismatch(outpoint));
                    }
                    Some(_) => {}
                }
                if !spent.insert(outpoint) {
                    return Err(ChainError::DoubleSpend(outpoint));
                }
            }
        }

        // All checks passed: apply
        for tx in &block.transactions {
            for outpoint in tx.spent_outpoints() {
                self.utxo_set.remove_utxo(&outpoint);
            }
            for utxo in tx.created_utxos() {
                self.utxo_set.add_utxo(utxo);
            }
            self.mempool.remove(&tx.txid);
        }
        self.index.insert(block.hash(), self.chain.len());
        self.chain.push(block.clone());

        Ok(())
    }

    /// Template for the next block: pending transactions whose inputs are
    /// unspent and not claimed by an earlier pick, in mempool order.
    pub fn block_template(&self) -> BlockTemplate {
        let mut claimed: HashSet<OutPoint> = HashSet::new();
        let mut transactions = Vec::new();

        for tx in self.mempool.iter() {
            let connects = tx.inputs.iter().all(|input| {
                let outpoint = input.outpoint();
                !claimed.contains(&outpoint) && self.utxo_set.get_utxo(&outpoint) == Some(input)
            });
            if connects {
                claimed.extend(tx.spent_outpoints());
                transactions.push(tx.clone());
            }
        }

        BlockTemplate {
            prev_hash: self.tip_hash(),
            height: self.height() + 1,
            params: self.params,
            transactions,
        }
    }

    /// Replace the canonical chain with `candidate` (genesis first) by
    /// replaying it from the genesis allocations.
    ///
    /// Transfers of the current chain go back to the mempool first so the
    /// replay can consume them; whatever the new chain leaves behind stays
    /// pending. On failure chain, UTXO set and mempool are restored exactly.
    /// Returns the blocks that left the canonical chain.
    pub fn replace_chain(&mut self, candidate: &[Block]) -> Result<Vec<Block>, ChainError> {
        match candidate.first() {
            Some(genesis) if genesis.hash() == self.genesis().hash() => {}
            _ => return Err(ChainError::GenesisMismatch),
        }

        let snapshot = (
            self.chain.clone(),
            self.index.clone(),
            self.utxo_set.clone(),
            self.mempool.clone(),
        );

        for block in &self.chain[1..] {
            for tx in block.transfers() {
                self.mempool.insert(tx.clone());
            }
        }

        let old_chain = std::mem::replace(&mut self.chain, vec![candidate[0].clone()]);
        self.index.clear();
        self.index.insert(candidate[0].hash(), 0);
        self.utxo_set = self.genesis_utxos.clone();

        for block in &candidate[1..] {
            if let Err(e) = self.append_block(block) {
                let (chain, index, utxo_set, mempool) = snapshot;
                self.chain = chain;
                self.index = index;
                self.utxo_set = utxo_set;
                self.mempool = mempool;
                return Err(e);
            }
        }

        let abandoned = old_chain
            .into_iter()
            .filter(|block| !self.index.contains_key(&block.hash()))
            .collect();

        Ok(abandoned)
    }
}
