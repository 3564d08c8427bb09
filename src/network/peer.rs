// Peer capability shared by nodes, wallets and miners

use crate::core::{Block, Hash256, Transaction};
use crate::network::Message;
use crate::storage::{BlockTemplate, UtxoSet};
use std::fmt;

/// Index of a node in its network registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// What a wallet or miner can ask of the node it talks to.
///
/// Calls are synchronous and in-process; each method is one logical
/// message of the gossip protocol.
pub trait Peer: Send + Sync {
    fn id(&self) -> NodeId;

    /// Offer a transaction; `true` only if newly accepted
    fn receive_transaction(&self, tx: Transaction) -> bool;

    /// Offer a block; `true` only if the canonical chain changed
    fn receive_block(&self, block: Block) -> bool;

    /// Whether this txid has already been offered to the peer
    fn has_seen_transaction(&self, txid: &Hash256) -> bool;

    /// Look up a canonical or buffered block (getdata)
    fn find_block(&self, hash: &Hash256) -> Option<Block>;

    fn tip_hash(&self) -> Hash256;

    fn block_template(&self) -> BlockTemplate;

    fn utxo_snapshot(&self) -> UtxoSet;

    /// Dispatch a relayed message
    fn deliver(&self, message: Message) -> bool {
        match message {
            Message::Tx(tx) => self.receive_transaction(tx),
            Message::Block(block) => self.receive_block(block),
        }
    }
}
