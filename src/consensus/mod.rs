// Consensus and validation logic

pub mod miner;
pub mod params;
pub mod pow;
pub mod validation;

pub use miner::{AttemptOutcome, Miner, MinerError, MinerStats};
pub use params::ChainParams;
pub use pow::{is_valid_proof, MiningOutcome, MiningResult, ProofOfWork, Target};
pub use validation::{BlockValidator, TransactionValidator, ValidationError};
