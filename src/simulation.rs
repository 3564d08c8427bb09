// Simulation driver: wires nodes, wallets and miners together and runs them

use crate::config::{ConfigError, SimConfig};
use crate::consensus::{Miner, MinerError, MinerStats};
use crate::core::{Address, Transaction};
use crate::network::{Network, NodeSummary};
use crate::storage::Utxo;
use crate::wallet::{KeyPair, Wallet, WalletError};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Miner(#[from] MinerError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub address: Address,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinerReport {
    pub address: Address,
    pub balance: u64,
    pub stats: MinerStats,
}

/// Final state of a run, printed as JSON by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub converged: bool,
    pub payments_sent: u64,
    pub payments_failed: u64,
    pub nodes: Vec<NodeSummary>,
    pub wallets: Vec<AccountReport>,
    pub miners: Vec<MinerReport>,
}

pub struct Simulation {
    config: SimConfig,
    network: Network,
    wallets: Vec<Wallet>,
    miners: Vec<Miner>,
    payments_sent: AtomicU64,
    payments_failed: AtomicU64,
}

impl Simulation {
    /// Build the network, fund every wallet at genesis and attach each
    /// wallet and miner to randomly chosen nodes.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let network = Network::with_ring(config.nodes, config.peer_connections, config.chain_params());

        let wallet_keys: Vec<KeyPair> = (0..config.wallets).map(|_| KeyPair::generate()).collect();
        let genesis: Vec<Utxo> = wallet_keys
            .iter()
            .enumerate()
            .map(|(i, kp)| Utxo::genesis(i as u32, config.initial_balance, kp.address.clone()))
            .collect();
        network.add_genesis_utxos(&genesis);

        let wallets = wallet_keys
            .into_iter()
            .map(|kp| Wallet::new(kp, network.random_peers(config.wallet_peers)))
            .collect();

        let pow_delay = Duration::from_millis(config.pow_delay_ms);
        let miners = (0..config.miners)
            .map(|_| {
                Miner::with_pow_delay(KeyPair::generate(), network.random_peers(config.miner_peers), pow_delay)
            })
            .collect();

        log::info!(
            "Simulation ready: {} nodes, {} wallets, {} miners, difficulty {}",
            config.nodes,
            config.wallets,
            config.miners,
            config.difficulty
        );

        Ok(Self {
            config,
            network,
            wallets,
            miners,
            payments_sent: AtomicU64::new(0),
            payments_failed: AtomicU64::new(0),
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    pub fn miners(&self) -> &[Miner] {
        &self.miners
    }

    /// One wallet pays another a random amount. `None` with fewer than two wallets.
    pub fn random_payment(&self) -> Option<Result<Transaction, WalletError>> {
        if self.wallets.len() < 2 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let from = rng.gen_range(0..self.wallets.len());
        let mut to = rng.gen_range(0..self.wallets.len() - 1);
        if to >= from {
            to += 1;
        }
        let amount = rng.gen_range(1..=self.config.max_tx_amount);

        let result = self.wallets[from].create_transaction(self.wallets[to].address(), amount);
        match &result {
            Ok(_) => {
                self.payments_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.payments_failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Payment from {} failed: {}", self.wallets[from].address().short(), e);
            }
        }
        Some(result)
    }

    pub fn start_miners(&self) -> Result<(), MinerError> {
        for miner in &self.miners {
            miner.start()?;
        }
        Ok(())
    }

    pub fn stop_miners(&self) {
        for miner in &self.miners {
            miner.stop();
        }
    }

    /// Mine and issue payments until the configured duration elapses or
    /// ctrl-c is received, then stop the miners and report.
    pub async fn run(self) -> Result<SimReport, SimError> {
        let sim = Arc::new(self);
        if let Err(e) = sim.start_miners() {
            sim.stop_miners();
            return Err(e.into());
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(sim.config.tx_interval_ms));
        let deadline = tokio::time::sleep(Duration::from_secs(sim.config.duration_secs));
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(deadline, interrupt);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    log::info!("Run time elapsed");
                    break;
                }
                _ = &mut interrupt => {
                    log::info!("Interrupted, shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // Node locks are shared with miner threads
                    let sim = Arc::clone(&sim);
                    tokio::task::spawn_blocking(move || sim.random_payment()).await?;
                }
            }
        }

        let stopping = Arc::clone(&sim);
        tokio::task::spawn_blocking(move || stopping.stop_miners()).await?;

        Ok(sim.report())
    }

    /// Snapshot every node; balances are read from the highest node
    pub fn report(&self) -> SimReport {
        let nodes = self.network.summaries();
        let reference = self
            .network
            .nodes()
            .iter()
            .max_by_key(|node| node.height())
            .cloned();
        let balance_of = |address: &Address| reference.as_ref().map_or(0, |node| node.balance(address));

        SimReport {
            converged: self.network.is_converged(),
            payments_sent: self.payments_sent.load(Ordering::Relaxed),
            payments_failed: self.payments_failed.load(Ordering::Relaxed),
            nodes,
            wallets: self
                .wallets
                .iter()
                .map(|wallet| AccountReport {
                    address: wallet.address().clone(),
                    balance: balance_of(wallet.address()),
                })
                .collect(),
            miners: self
                .miners
                .iter()
                .map(|miner| MinerReport {
                    address: miner.address().clone(),
                    balance: balance_of(miner.address()),
                    stats: miner.stats(),
                })
                .collect(),
        }
    }
}
