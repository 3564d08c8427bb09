// Transaction data structures

use crate::core::serialize::{write_var_bytes, write_varint, Encodable};
use crate::core::{hash256, sign_payload, verify_payload, Address, Hash256};
use crate::storage::{OutPoint, Utxo};
use secp256k1::SecretKey;
use serde::Serialize;
use std::io::{self, Write};

/// Flat fee charged on every non-coinbase transaction
pub const TRANSACTION_FEE: u64 = 1;

/// Transaction output - amount and recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TxOutput {
    pub owner: Address,
    pub amount: u64,
}

impl TxOutput {
    pub fn new(owner: Address, amount: u64) -> Self {
        Self { owner, amount }
    }
}

impl Encodable for TxOutput {
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_var_bytes(writer, self.owner.as_str().as_bytes())?;
        writer.write_all(&self.amount.to_le_bytes())
    }
}

impl Encodable for OutPoint {
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.txid.as_bytes())?;
        writer.write_all(&self.index.to_le_bytes())
    }
}

/// Transaction
///
/// Inputs carry the full UTXO records they consume. The fee is never
/// stored: it is the gap between input and output totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// `None` for coinbase transactions
    pub sender: Option<Address>,
    pub recipient: Address,
    pub amount: u64,
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    /// Height of the block a coinbase pays for, zero for transfers
    pub height: u64,
    #[serde(skip)]
    pub signature: Vec<u8>,
    pub txid: Hash256,
}

impl Transaction {
    /// Create an unsigned transfer
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: u64,
        inputs: Vec<Utxo>,
        outputs: Vec<TxOutput>,
    ) -> Self {
        let mut tx = Self {
            sender: Some(sender),
            recipient,
            amount,
            inputs,
            outputs,
            height: 0,
            signature: Vec::new(),
            txid: Hash256::zero(),
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// Create a coinbase transaction (mining reward)
    pub fn coinbase(recipient: Address, reward: u64, height: u64) -> Self {
        let mut tx = Self {
            sender: None,
            recipient: recipient.clone(),
            amount: reward,
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(recipient, reward)],
            height,
            signature: Vec::new(),
            txid: Hash256::zero(),
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// Sign with the sender's key and refresh the txid
    pub fn sign(&mut self, secret_key: &SecretKey) {
        self.signature = sign_payload(secret_key, &self.signing_payload());
        self.txid = self.compute_txid();
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.sender.is_none()
    }

    /// Deterministic serialization covered by the signature.
    /// Inputs are sorted by (txid, index) and outputs by owner, so the
    /// selection order never changes the bytes.
    pub fn signing_payload(&self) -> Vec<u8> {
        SigningPayload(self).to_bytes()
    }

    /// Transaction ID: hash256(signing payload || signature)
    pub fn compute_txid(&self) -> Hash256 {
        let mut content = self.signing_payload();
        content.extend_from_slice(&self.signature);
        hash256(&content)
    }

    /// Signature check. Coinbase transactions pass trivially; anything
    /// malformed counts as a failed verification.
    pub fn verify(&self) -> bool {
        if self.compute_txid() != self.txid {
            return false;
        }
        match &self.sender {
            None => true,
            Some(sender) => {
                verify_payload(sender, &self.signing_payload(), &self.signature).unwrap_or(false)
            }
        }
    }

    /// Sum of consumed input amounts, `None` on overflow
    pub fn total_input_value(&self) -> Option<u64> {
        checked_total(self.inputs.iter().map(|input| input.amount))
    }

    /// Sum of output amounts, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        checked_total(self.outputs.iter().map(|out| out.amount))
    }

    /// Whether inputs cover outputs plus exactly one fee
    pub fn conserves_value(&self) -> bool {
        let spent = self
            .total_output_value()
            .and_then(|total| total.checked_add(TRANSACTION_FEE));
        match (spent, self.total_input_value()) {
            (Some(spent), Some(available)) => spent == available,
            _ => false,
        }
    }

    /// Outpoints consumed by this transaction
    pub fn spent_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(Utxo::outpoint)
    }

    /// UTXOs created by this transaction once it lands in a block
    pub fn created_utxos(&self) -> impl Iterator<Item = Utxo> + '_ {
        self.outputs.iter().enumerate().map(move |(index, output)| {
            Utxo::new(self.txid, index as u32, output.amount, output.owner.clone())
        })
    }
}

fn checked_total(mut amounts: impl Iterator<Item = u64>) -> Option<u64> {
    amounts.try_fold(0u64, |total, amount| total.checked_add(amount))
}

/// Byte layout signed by the sender
struct SigningPayload<'a>(&'a Transaction);

impl Encodable for SigningPayload<'_> {
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let tx = self.0;
        let sender = tx.sender.as_ref().map(|s| s.as_str().as_bytes()).unwrap_or_default();
        write_var_bytes(writer, sender)?;

        let mut outpoints: Vec<OutPoint> = tx.inputs.iter().map(Utxo::outpoint).collect();
        outpoints.sort();
        write_varint(writer, outpoints.len() as u64)?;
        for outpoint in &outpoints {
            outpoint.encode(writer)?;
        }

        let mut outputs: Vec<&TxOutput> = tx.outputs.iter().collect();
        outputs.sort_by(|a, b| a.owner.cmp(&b.owner).then(a.amount.cmp(&b.amount)));
        write_varint(writer, outputs.len() as u64)?;
        for output in outputs {
            output.encode(writer)?;
        }

        write_varint(writer, tx.height)
    }
}
