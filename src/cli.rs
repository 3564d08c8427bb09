// CLI commands

use crate::config::SimConfig;
use crate::consensus::{AttemptOutcome, Miner};
use crate::network::{Network, NodeId, Peer};
use crate::simulation::{SimError, Simulation};
use crate::storage::Utxo;
use crate::wallet::{KeyPair, Wallet};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "powsim")]
#[command(about = "Proof-of-work network simulator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulated network and print a JSON report
    Run(RunArgs),

    /// Print the default configuration as JSON
    DefaultConfig,

    /// Alice pays Bob on a three-node network and one block is mined
    Scenario {
        /// Leading zero bits required of block hashes
        #[arg(short, long, default_value = "8")]
        difficulty: u32,
    },
}

#[derive(Args, Default)]
pub struct RunArgs {
    /// JSON config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub nodes: Option<usize>,

    #[arg(long)]
    pub miners: Option<usize>,

    #[arg(long)]
    pub wallets: Option<usize>,

    #[arg(long)]
    pub difficulty: Option<u32>,

    /// Run time in seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Pause between nonces in milliseconds
    #[arg(long)]
    pub pow_delay_ms: Option<u64>,
}

impl RunArgs {
    /// Config file (or defaults) with command-line overrides applied
    pub fn resolve(&self) -> Result<SimConfig, SimError> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load(path)?,
            None => SimConfig::default(),
        };

        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(miners) = self.miners {
            config.miners = miners;
        }
        if let Some(wallets) = self.wallets {
            config.wallets = wallets;
        }
        if let Some(difficulty) = self.difficulty {
            config.difficulty = difficulty;
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(delay) = self.pow_delay_ms {
            config.pow_delay_ms = delay;
        }

        Ok(config)
    }
}

/// CLI handler
pub struct CliHandler;

impl CliHandler {
    /// Handle CLI command
    pub async fn handle(cli: Cli) -> Result<(), String> {
        match cli.command {
            Commands::Run(args) => Self::run(args).await.map_err(|e| e.to_string()),
            Commands::DefaultConfig => {
                let json = SimConfig::default().to_json().map_err(|e| e.to_string())?;
                println!("{}", json);
                Ok(())
            }
            Commands::Scenario { difficulty } => Self::scenario(difficulty),
        }
    }

    async fn run(args: RunArgs) -> Result<(), SimError> {
        let config = args.resolve()?;
        let report = Simulation::new(config)?.run().await?;

        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => log::error!("Failed to render report: {}", e),
        }
        Ok(())
    }

    fn scenario(difficulty: u32) -> Result<(), String> {
        let config = SimConfig {
            difficulty,
            ..SimConfig::default()
        };
        config.validate().map_err(|e| e.to_string())?;

        let network = Network::with_ring(3, 1, config.chain_params());
        let (alice, bob, chris) = (KeyPair::generate(), KeyPair::generate(), KeyPair::generate());
        network.add_genesis_utxos(&[
            Utxo::genesis(0, 50, alice.address.clone()),
            Utxo::genesis(1, 50, bob.address.clone()),
            Utxo::genesis(2, 50, chris.address.clone()),
        ]);

        let entry = network.node(NodeId(0)).ok_or("Network has no nodes")?;
        let entry: Arc<dyn Peer> = entry;
        let alice_wallet = Wallet::new(alice, vec![entry.clone()]);
        let tx = alice_wallet
            .create_transaction(&bob.address, 5)
            .map_err(|e| e.to_string())?;
        println!("Alice -> Bob: 5 (tx {})", tx.txid);

        let miner = Miner::new(KeyPair::generate(), vec![entry]);
        let hash = loop {
            match miner.mine_once().map_err(|e| e.to_string())? {
                AttemptOutcome::Accepted(hash) => break hash,
                other => log::debug!("Mining attempt ended: {:?}", other),
            }
        };
        println!("Mined block {}", hash);

        let node = network.node(NodeId(2)).ok_or("Network has no third node")?;
        println!("Balances on {} (height {}):", node.id(), node.height());
        for (name, address) in [
            ("Alice", alice_wallet.address()),
            ("Bob", &bob.address),
            ("Chris", &chris.address),
            ("Miner", miner.address()),
        ] {
            println!("  {:<6} {}", name, node.balance(address));
        }
        println!("  Total  {}", node.summary().utxo_total);

        Ok(())
    }
}
