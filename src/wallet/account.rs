// Wallet role: builds and submits payments through a connected node

use crate::core::{Address, Hash256, Transaction};
use crate::network::Peer;
use crate::wallet::{KeyPair, TransactionBuilder};
use rand::seq::SliceRandom;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("Wallet is not connected to any node")]
    NoPeers,
    #[error("Transaction {0} was rejected by the node")]
    Rejected(Hash256),
}

/// A key pair plus the nodes it trusts for balances and submission
pub struct Wallet {
    keypair: KeyPair,
    peers: Vec<Arc<dyn Peer>>,
}

impl Wallet {
    pub fn new(keypair: KeyPair, peers: Vec<Arc<dyn Peer>>) -> Self {
        Self { keypair, peers }
    }

    pub fn address(&self) -> &Address {
        &self.keypair.address
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn peers(&self) -> &[Arc<dyn Peer>] {
        &self.peers
    }

    fn pick_peer(&self) -> Result<&Arc<dyn Peer>, WalletError> {
        self.peers.choose(&mut rand::thread_rng()).ok_or(WalletError::NoPeers)
    }

    /// Balance according to one of the connected nodes
    pub fn balance(&self) -> Result<u64, WalletError> {
        let peer = self.pick_peer()?;
        Ok(peer.utxo_snapshot().get_balance(&self.keypair.address))
    }

    /// Pay `amount` to `to` plus the fixed fee.
    ///
    /// Inputs are chosen from a randomly picked node's UTXO set and the
    /// signed transaction is submitted to that same node.
    pub fn create_transaction(&self, to: &Address, amount: u64) -> Result<Transaction, WalletError> {
        let peer = self.pick_peer()?;
        let utxo_set = peer.utxo_snapshot();
        let tx = TransactionBuilder::new(&self.keypair, &utxo_set).build(to, amount)?;

        if !peer.receive_transaction(tx.clone()) {
            return Err(WalletError::Rejected(tx.txid));
        }

        log::info!(
            "Wallet {} paid {} to {} via {} (tx {})",
            self.keypair.address.short(),
            amount,
            to.short(),
            peer.id(),
            tx.txid
        );
        Ok(tx)
    }
}
