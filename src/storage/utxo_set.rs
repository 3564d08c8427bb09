// UTXO (Unspent Transaction Output) set management

use crate::core::{hash256, Address, Hash256};
use serde::Serialize;
use std::collections::BTreeMap;

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

/// One unspent output, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Utxo {
    pub txid: Hash256,
    pub index: u32,
    pub amount: u64,
    pub owner: Address,
}

impl Utxo {
    pub fn new(txid: Hash256, index: u32, amount: u64, owner: Address) -> Self {
        Self {
            txid,
            index,
            amount,
            owner,
        }
    }

    /// Initial allocation seeded into every node before mining starts
    pub fn genesis(index: u32, amount: u64, owner: Address) -> Self {
        Self::new(genesis_txid(), index, amount, owner)
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.index)
    }
}

/// Pseudo transaction id shared by all genesis allocations
pub fn genesis_txid() -> Hash256 {
    hash256(b"initial_transaction")
}

/// In-memory UTXO set keyed by outpoint.
/// Iteration order is (txid, index), which keeps coin selection deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    utxos: BTreeMap<OutPoint, Utxo>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a UTXO, replacing any entry with the same outpoint
    pub fn add_utxo(&mut self, utxo: Utxo) {
        self.utxos.insert(utxo.outpoint(), utxo);
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    /// Remove a UTXO (spent)
    pub fn remove_utxo(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.remove(outpoint)
    }

    pub fn has_utxo(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    /// Get balance for an address
    pub fn get_balance(&self, owner: &Address) -> u64 {
        self.utxos_for(owner).fold(0u64, |total, utxo| total.saturating_add(utxo.amount))
    }

    /// All UTXOs owned by an address, in set order
    pub fn utxos_for<'a>(&'a self, owner: &'a Address) -> impl Iterator<Item = &'a Utxo> + 'a {
        self.utxos.values().filter(move |utxo| &utxo.owner == owner)
    }

    /// Sum of every amount in the set
    pub fn total_value(&self) -> u64 {
        self.utxos.values().fold(0u64, |total, utxo| total.saturating_add(utxo.amount))
    }

    pub fn count(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

impl FromIterator<Utxo> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = Utxo>>(iter: I) -> Self {
        let mut set = UtxoSet::new();
        for utxo in iter {
            set.add_utxo(utxo);
        }
        set
    }
}
