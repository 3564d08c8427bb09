// Transaction and block validation

use crate::consensus::pow::is_valid_proof;
use crate::consensus::ChainParams;
use crate::core::{Block, Transaction};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// How far ahead of local time a block timestamp may be
const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

/// Validation error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid proof of work")]
    InvalidProofOfWork,
    #[error("Wrong difficulty: expected {expected}, found {found}")]
    WrongDifficulty { expected: u32, found: u32 },
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Block has no transactions")]
    NoTransactions,
    #[error("Missing coinbase transaction")]
    MissingCoinbase,
    #[error("Coinbase not in first position")]
    CoinbaseNotFirst,
    #[error("Malformed coinbase transaction")]
    InvalidCoinbase,
    #[error("Invalid reward amount: expected {expected}, found {found}")]
    InvalidReward { expected: u64, found: u64 },
    #[error("Invalid timestamp")]
    InvalidTimestamp,
    #[error("Genesis block cannot be relayed")]
    UnexpectedGenesis,
    #[error("Coinbase transactions are only valid inside blocks")]
    CoinbaseNotAllowed,
    #[error("Empty transaction")]
    EmptyTransaction,
    #[error("Zero value output")]
    ZeroValueOutput,
    #[error("Inputs do not equal outputs plus fee")]
    ValueNotConserved,
    #[error("Input not owned by sender")]
    WrongInputOwner,
    #[error("Input spent twice")]
    DuplicateInput,
    #[error("Invalid signature")]
    InvalidSignature,
}

/// Consensus-rule checks on a block in isolation.
///
/// Signatures and UTXO availability are not checked here; that happens
/// when the block is applied to a chain state.
#[derive(Debug, Clone)]
pub struct BlockValidator {
    params: ChainParams,
}

impl BlockValidator {
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Validate a complete block
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        let header = &block.header;

        if block.is_genesis() {
            return Err(ValidationError::UnexpectedGenesis);
        }

        if header.difficulty != self.params.difficulty {
            return Err(ValidationError::WrongDifficulty {
                expected: self.params.difficulty,
                found: header.difficulty,
            });
        }

        if !is_valid_proof(&block.hash(), header.difficulty) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if header.timestamp > now + MAX_FUTURE_DRIFT_SECS {
            return Err(ValidationError::InvalidTimestamp);
        }

        // First transaction must be coinbase, and only the first
        let coinbase = match block.transactions.first() {
            None => return Err(ValidationError::NoTransactions),
            Some(tx) if !tx.is_coinbase() => return Err(ValidationError::MissingCoinbase),
            Some(tx) => tx,
        };
        if block.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(ValidationError::CoinbaseNotFirst);
        }

        if !coinbase.inputs.is_empty()
            || coinbase.outputs.len() != 1
            || coinbase.outputs[0].amount != coinbase.amount
            || coinbase.height != header.height
        {
            return Err(ValidationError::InvalidCoinbase);
        }

        let expected = self.params.block_reward(block.transactions.len() - 1);
        if coinbase.amount != expected {
            return Err(ValidationError::InvalidReward {
                expected,
                found: coinbase.amount,
            });
        }

        if Block::calculate_merkle_root(&block.transactions) != header.merkle_root {
            return Err(ValidationError::InvalidMerkleRoot);
        }

        Ok(())
    }
}

/// Transaction validator (for mempool validation)
pub struct TransactionValidator;

impl TransactionValidator {
    /// Stateless checks for mempool acceptance
    pub fn validate_for_mempool(tx: &Transaction) -> Result<(), ValidationError> {
        let sender = tx.sender.as_ref().ok_or(ValidationError::CoinbaseNotAllowed)?;

        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }

        if tx.outputs.iter().any(|out| out.amount == 0) {
            return Err(ValidationError::ZeroValueOutput);
        }

        if tx.inputs.iter().any(|input| &input.owner != sender) {
            return Err(ValidationError::WrongInputOwner);
        }

        let mut seen = HashSet::new();
        if !tx.spent_outpoints().all(|outpoint| seen.insert(outpoint)) {
            return Err(ValidationError::DuplicateInput);
        }

        if !tx.conserves_value() {
            return Err(ValidationError::ValueNotConserved);
        }

        if !tx.verify() {
            return Err(ValidationError::InvalidSignature);
        }

        Ok(())
    }
}
