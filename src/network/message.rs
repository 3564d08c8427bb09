// Gossip messages relayed between nodes

use crate::core::{Block, Hash256, Transaction};

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Block,
    Tx,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Block => "block",
            MessageType::Tx => "tx",
        }
    }
}

/// Network message
#[derive(Debug, Clone)]
pub enum Message {
    Block(Block),
    Tx(Transaction),
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Block(_) => MessageType::Block,
            Message::Tx(_) => MessageType::Tx,
        }
    }

    /// Block hash or txid, the key peers deduplicate on
    pub fn inventory_hash(&self) -> Hash256 {
        match self {
            Message::Block(block) => block.hash(),
            Message::Tx(tx) => tx.txid,
        }
    }
}
