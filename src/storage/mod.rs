// In-memory ledger storage: UTXO set, mempool and per-node chain state

mod chain_state;
mod mempool;
mod utxo_set;

pub use chain_state::{BlockTemplate, ChainError, ChainState};
pub use mempool::Mempool;
pub use utxo_set::{genesis_txid, OutPoint, Utxo, UtxoSet};
