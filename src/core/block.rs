// Block data structures

use crate::core::serialize::Encodable;
use crate::core::{hash256, Hash256, Transaction};
use serde::Serialize;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed timestamp of the genesis block
const GENESIS_TIMESTAMP: u64 = 1_231_006_505;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    /// Hash of the previous block
    pub prev_block_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Required leading zero bits of the block hash
    pub difficulty: u32,
    /// Position in the chain, genesis is 0
    pub height: u64,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// Nonce for proof-of-work
    pub nonce: u64,
}

impl BlockHeader {
    /// Calculate the hash of this block header.
    /// Always recomputed so a nonce change is never hidden behind a stale value.
    pub fn hash(&self) -> Hash256 {
        hash256(&self.to_bytes())
    }
}

impl Encodable for BlockHeader {
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.prev_block_hash.as_bytes())?;
        writer.write_all(self.merkle_root.as_bytes())?;
        writer.write_all(&self.difficulty.to_le_bytes())?;
        writer.write_all(&self.height.to_le_bytes())?;
        writer.write_all(&self.timestamp.to_le_bytes())?;
        writer.write_all(&self.nonce.to_le_bytes())
    }
}

/// Block - contains header and transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Transactions in this block, coinbase first
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble an unsolved block (nonce 0) on top of `prev_block_hash`
    pub fn new(
        prev_block_hash: Hash256,
        transactions: Vec<Transaction>,
        difficulty: u32,
        height: u64,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let header = BlockHeader {
            prev_block_hash,
            merkle_root: Self::calculate_merkle_root(&transactions),
            difficulty,
            height,
            timestamp,
            nonce: 0,
        };

        Self {
            header,
            transactions,
        }
    }

    /// The genesis block shared by every node: no transactions, no proof-of-work.
    /// Initial balances come from seeded UTXOs instead.
    pub fn genesis() -> Self {
        let header = BlockHeader {
            prev_block_hash: Hash256::zero(),
            merkle_root: Hash256::zero(),
            difficulty: 0,
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
            nonce: 0,
        };

        Self {
            header,
            transactions: Vec::new(),
        }
    }

    /// Calculate Merkle root from transactions
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        if transactions.is_empty() {
            return Hash256::zero();
        }

        let mut hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.txid).collect();

        while hashes.len() > 1 {
            let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));

            for chunk in hashes.chunks(2) {
                let left = chunk[0];
                let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };

                let mut combined = Vec::with_capacity(64);
                combined.extend_from_slice(left.as_bytes());
                combined.extend_from_slice(right.as_bytes());
                next_level.push(hash256(&combined));
            }

            hashes = next_level;
        }

        hashes[0]
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> Hash256 {
        self.header.prev_block_hash
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash == Hash256::zero() && self.header.height == 0
    }

    /// The reward transaction, if the block has one in first position
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Non-coinbase transactions
    pub fn transfers(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| !tx.is_coinbase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Address;

    fn reward(tag: &str, amount: u64, height: u64) -> Transaction {
        Transaction::coinbase(Address(tag.to_string()), amount, height)
    }

    #[test]
    fn test_block_hash_is_pure() {
        let block = Block::new(Hash256::zero(), vec![reward("m", 2, 1)], 4, 1);

        // Same header should produce same hash
        assert_eq!(block.hash(), block.hash());
        assert_eq!(block.hash(), block.clone().hash());
    }

    #[test]
    fn test_nonce_changes_hash() {
        let mut block = Block::new(Hash256::zero(), vec![reward("m", 2, 1)], 4, 1);
        let before = block.hash();
        block.header.nonce += 1;
        assert_ne!(before, block.hash());
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert!(genesis.is_genesis());
        assert!(genesis.transactions.is_empty());
        assert!(genesis.coinbase().is_none());
        assert_eq!(genesis.hash(), Block::genesis().hash());
    }

    #[test]
    fn test_merkle_root_single_tx() {
        let tx = reward("m", 2, 1);
        let merkle = Block::calculate_merkle_root(std::slice::from_ref(&tx));
        assert_eq!(merkle, tx.txid);
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let tx1 = reward("a", 1, 1);
        let tx2 = reward("b", 2, 1);

        let forward = Block::calculate_merkle_root(&[tx1.clone(), tx2.clone()]);
        let backward = Block::calculate_merkle_root(&[tx2, tx1]);
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_coinbase_accessors() {
        let block = Block::new(Hash256::zero(), vec![reward("m", 2, 1)], 0, 1);
        assert_eq!(block.coinbase().map(|tx| tx.amount), Some(2));
        assert_eq!(block.transfers().count(), 0);
        assert_eq!(block.height(), 1);
    }
}
