// Pending transaction pool

use crate::core::{Hash256, Transaction};
use std::collections::HashMap;

/// Transactions seen but not yet in the chain, keyed by txid.
/// Keeps arrival order so block templates are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mempool {
    transactions: HashMap<Hash256, Transaction>,
    order: Vec<Hash256>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction; `false` if its txid is already present
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.transactions.contains_key(&tx.txid) {
            return false;
        }
        self.order.push(tx.txid);
        self.transactions.insert(tx.txid, tx);
        true
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        let removed = self.transactions.remove(txid)?;
        self.order.retain(|id| id != txid);
        Some(removed)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.transactions.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.transactions.get(txid)
    }

    /// Transactions in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.order.iter().filter_map(|txid| self.transactions.get(txid))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
