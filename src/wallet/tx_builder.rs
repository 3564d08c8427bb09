// Transaction builder

use crate::core::{Address, Transaction, TxOutput, TRANSACTION_FEE};
use crate::storage::{Utxo, UtxoSet};
use crate::wallet::{KeyPair, WalletError};

/// Builds signed transfers from a view of some node's UTXO set
pub struct TransactionBuilder<'a> {
    keypair: &'a KeyPair,
    utxo_set: &'a UtxoSet,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a new transaction builder
    pub fn new(keypair: &'a KeyPair, utxo_set: &'a UtxoSet) -> Self {
        Self { keypair, utxo_set }
    }

    /// Build a transaction sending `amount` to `to`, paying the fixed fee.
    /// Change, if any, goes back to the sender as a second output.
    pub fn build(&self, to: &Address, amount: u64) -> Result<Transaction, WalletError> {
        let target = amount
            .checked_add(TRANSACTION_FEE)
            .ok_or_else(|| WalletError::InsufficientFunds {
                available: self.get_balance(),
                required: u64::MAX,
            })?;
        let (selected, total_input) = self.select_utxos(target)?;

        let mut outputs = vec![TxOutput::new(to.clone(), amount)];
        let change = total_input - target;
        if change > 0 {
            outputs.push(TxOutput::new(self.keypair.address.clone(), change));
        }

        let mut tx = Transaction::new(self.keypair.address.clone(), to.clone(), amount, selected, outputs);
        tx.sign(&self.keypair.secret_key);

        Ok(tx)
    }

    /// First-fit selection in UTXO set order
    fn select_utxos(&self, target: u64) -> Result<(Vec<Utxo>, u64), WalletError> {
        let mut selected = Vec::new();
        let mut total = 0u64;

        for utxo in self.utxo_set.utxos_for(&self.keypair.address) {
            // A sum past u64::MAX could never form a valid transaction
            total = match total.checked_add(utxo.amount) {
                Some(sum) => sum,
                None => break,
            };
            selected.push(utxo.clone());

            if total >= target {
                return Ok((selected, total));
            }
        }

        Err(WalletError::InsufficientFunds {
            available: total,
            required: target,
        })
    }

    /// Get balance for the sender
    pub fn get_balance(&self) -> u64 {
        self.utxo_set.get_balance(&self.keypair.address)
    }
}
