// Wallet functionality

mod account;
mod keystore;
mod tx_builder;

pub use account::{Wallet, WalletError};
pub use keystore::KeyPair;
pub use tx_builder::TransactionBuilder;
