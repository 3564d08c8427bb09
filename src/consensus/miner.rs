// Miner role: repeatedly builds a block on a node's tip and searches for a nonce

use crate::consensus::{MiningOutcome, ProofOfWork};
use crate::core::{Address, Hash256};
use crate::network::Peer;
use crate::wallet::KeyPair;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinerError {
    #[error("Miner is not connected to any node")]
    NoPeers,
    #[error("Miner is already running")]
    AlreadyRunning,
    #[error("Failed to spawn mining thread: {0}")]
    Spawn(String),
}

/// How one mining attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Solved and the node adopted it
    Accepted(Hash256),
    /// Solved but the node did not extend its chain with it
    Rejected(Hash256),
    /// The node's tip moved, or the nonce space ran out
    Stale,
    /// The miner was stopped
    Stopped,
}

/// Counters since the miner was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinerStats {
    pub hashes: u64,
    pub blocks_found: u64,
    pub blocks_accepted: u64,
}

#[derive(Default)]
struct Counters {
    hashes: AtomicU64,
    blocks_found: AtomicU64,
    blocks_accepted: AtomicU64,
}

/// State shared between the miner handle and its worker thread
struct Session {
    address: Address,
    peers: Vec<Arc<dyn Peer>>,
    pow_delay: Duration,
    running: AtomicBool,
    counters: Counters,
}

impl Session {
    /// Build on a random peer's tip until solved, stale or stopped
    fn attempt(&self) -> Result<AttemptOutcome, MinerError> {
        let peer = self
            .peers
            .choose(&mut rand::thread_rng())
            .ok_or(MinerError::NoPeers)?;

        let template = peer.block_template();
        let prev = template.prev_hash;
        let mut block = template.into_block(&self.address);

        let pow = ProofOfWork::new(block.header.difficulty).with_delay(self.pow_delay);
        let result = pow.mine(&mut block.header, || {
            !self.running.load(Ordering::SeqCst) || peer.tip_hash() != prev
        });
        self.counters.hashes.fetch_add(result.attempts, Ordering::Relaxed);

        match result.outcome {
            MiningOutcome::Solved => {
                let hash = block.hash();
                self.counters.blocks_found.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "Miner {} found block {} at height {} ({} hashes, {:.0} H/s)",
                    self.address.short(),
                    hash,
                    block.height(),
                    result.attempts,
                    result.hash_rate()
                );
                if peer.receive_block(block) {
                    self.counters.blocks_accepted.fetch_add(1, Ordering::Relaxed);
                    Ok(AttemptOutcome::Accepted(hash))
                } else {
                    Ok(AttemptOutcome::Rejected(hash))
                }
            }
            MiningOutcome::Aborted if !self.running.load(Ordering::SeqCst) => Ok(AttemptOutcome::Stopped),
            MiningOutcome::Aborted | MiningOutcome::Exhausted => {
                log::debug!("Miner {} abandoned stale template on {}", self.address.short(), prev);
                Ok(AttemptOutcome::Stale)
            }
        }
    }

    fn run(&self) {
        log::info!("Miner {} started", self.address.short());
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.attempt() {
                log::error!("Miner {} stopping: {}", self.address.short(), e);
                break;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        log::info!("Miner {} stopped", self.address.short());
    }
}

/// A mining participant with its own key pair and a set of nodes it
/// submits to. Mining runs on a dedicated thread between `start` and `stop`.
pub struct Miner {
    keypair: KeyPair,
    session: Arc<Session>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(keypair: KeyPair, peers: Vec<Arc<dyn Peer>>) -> Self {
        Self::with_pow_delay(keypair, peers, Duration::ZERO)
    }

    /// `pow_delay` is slept between nonces to slow the search down
    pub fn with_pow_delay(keypair: KeyPair, peers: Vec<Arc<dyn Peer>>, pow_delay: Duration) -> Self {
        let session = Arc::new(Session {
            address: keypair.address.clone(),
            peers,
            pow_delay,
            running: AtomicBool::new(false),
            counters: Counters::default(),
        });
        Self {
            keypair,
            session,
            worker: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &Address {
        &self.keypair.address
    }

    pub fn is_mining(&self) -> bool {
        self.session.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MinerStats {
        let counters = &self.session.counters;
        MinerStats {
            hashes: counters.hashes.load(Ordering::Relaxed),
            blocks_found: counters.blocks_found.load(Ordering::Relaxed),
            blocks_accepted: counters.blocks_accepted.load(Ordering::Relaxed),
        }
    }

    /// Run a single attempt on the calling thread
    pub fn mine_once(&self) -> Result<AttemptOutcome, MinerError> {
        let worker = self.worker.lock();
        if worker.is_some() || self.is_mining() {
            return Err(MinerError::AlreadyRunning);
        }
        self.session.running.store(true, Ordering::SeqCst);
        let outcome = self.session.attempt();
        self.session.running.store(false, Ordering::SeqCst);
        drop(worker);
        outcome
    }

    /// Start mining on a background thread
    pub fn start(&self) -> Result<(), MinerError> {
        if self.session.peers.is_empty() {
            return Err(MinerError::NoPeers);
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(MinerError::AlreadyRunning);
        }

        self.session.running.store(true, Ordering::SeqCst);
        let session = Arc::clone(&self.session);
        let handle = std::thread::Builder::new()
            .name(format!("miner-{}", self.keypair.address.short()))
            .spawn(move || session.run())
            .map_err(|e| {
                self.session.running.store(false, Ordering::SeqCst);
                MinerError::Spawn(e.to_string())
            })?;

        *worker = Some(handle);
        Ok(())
    }

    /// Signal the worker and wait for the current attempt to wind down
    pub fn stop(&self) {
        self.session.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::warn!("Miner {} thread panicked", self.keypair.address.short());
            }
        }
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ChainParams;
    use crate::core::{Block, Transaction};
    use crate::network::{Network, Node, NodeId};
    use crate::storage::{BlockTemplate, UtxoSet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_mine_once_extends_chain() {
        let node = Node::standalone(ChainParams::new(4, 2));
        let miner = Miner::new(KeyPair::generate(), vec![node.clone() as Arc<dyn Peer>]);

        let outcome = miner.mine_once().unwrap();
        assert_eq!(outcome, AttemptOutcome::Accepted(node.tip_hash()));
        assert_eq!(node.height(), 1);
        assert_eq!(node.balance(miner.address()), 2);

        let stats = miner.stats();
        assert_eq!(stats.blocks_found, 1);
        assert_eq!(stats.blocks_accepted, 1);
        assert!(stats.hashes >= 1);
        assert!(!miner.is_mining());
    }

    #[test]
    fn test_miner_without_peers() {
        let miner = Miner::new(KeyPair::generate(), Vec::new());
        assert_eq!(miner.start(), Err(MinerError::NoPeers));
        assert_eq!(miner.mine_once(), Err(MinerError::NoPeers));
        assert!(!miner.is_mining());
    }

    #[test]
    fn test_start_and_stop() {
        let node = Node::standalone(ChainParams::new(4, 2));
        let miner = Miner::new(KeyPair::generate(), vec![node.clone() as Arc<dyn Peer>]);

        miner.start().unwrap();
        assert!(miner.is_mining());
        assert_eq!(miner.start(), Err(MinerError::AlreadyRunning));

        assert!(wait_until(Duration::from_secs(30), || node.height() >= 2));
        miner.stop();
        assert!(!miner.is_mining());

        let height = node.height();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(node.height(), height);
        assert_eq!(node.balance(miner.address()), 2 * height);
    }

    #[test]
    fn test_two_miners_share_one_chain() {
        let network = Network::with_ring(3, 1, ChainParams::new(6, 2));
        let a = Miner::new(KeyPair::generate(), vec![network.node(NodeId(0)).unwrap() as Arc<dyn Peer>]);
        let b = Miner::new(KeyPair::generate(), vec![network.node(NodeId(2)).unwrap() as Arc<dyn Peer>]);

        a.start().unwrap();
        b.start().unwrap();
        let grown = wait_until(Duration::from_secs(30), || {
            network.nodes().iter().all(|node| node.height() >= 4)
        });
        a.stop();
        b.stop();
        assert!(grown);

        // The last two blocks may have tied; one more block settles it
        let tiebreaker = Miner::new(KeyPair::generate(), vec![network.node(NodeId(1)).unwrap() as Arc<dyn Peer>]);
        assert!(matches!(tiebreaker.mine_once(), Ok(AttemptOutcome::Accepted(_))));

        assert!(network.is_converged());
        let node = network.node(NodeId(1)).unwrap();
        let minted = 2 * node.height();
        assert_eq!(node.summary().utxo_total, minted);
        assert_eq!(
            node.balance(a.address()) + node.balance(b.address()) + node.balance(tiebreaker.address()),
            minted
        );
    }

    /// A peer whose tip changes after a few polls and never accepts blocks
    struct ShiftingPeer {
        inner: Arc<Node>,
        polls: AtomicUsize,
    }

    impl Peer for ShiftingPeer {
        fn id(&self) -> NodeId {
            self.inner.id()
        }
        fn receive_transaction(&self, tx: Transaction) -> bool {
            self.inner.receive_transaction(tx)
        }
        fn receive_block(&self, _block: Block) -> bool {
            false
        }
        fn has_seen_transaction(&self, txid: &Hash256) -> bool {
            self.inner.has_seen_transaction(txid)
        }
        fn find_block(&self, hash: &Hash256) -> Option<Block> {
            self.inner.find_block(hash)
        }
        fn tip_hash(&self) -> Hash256 {
            if self.polls.fetch_add(1, Ordering::SeqCst) < 3 {
                self.inner.tip_hash()
            } else {
                Hash256::new([0xab; 32])
            }
        }
        fn block_template(&self) -> BlockTemplate {
            self.inner.block_template()
        }
        fn utxo_snapshot(&self) -> UtxoSet {
            self.inner.utxo_snapshot()
        }
    }

    #[test]
    fn test_attempt_abandoned_when_tip_moves() {
        // Unreachable difficulty: only the tip change can end the search
        let peer = Arc::new(ShiftingPeer {
            inner: Node::standalone(ChainParams::new(256, 2)),
            polls: AtomicUsize::new(0),
        });
        let miner = Miner::new(KeyPair::generate(), vec![peer as Arc<dyn Peer>]);

        assert_eq!(miner.mine_once(), Ok(AttemptOutcome::Stale));
        assert_eq!(miner.stats().hashes, 3);
        assert_eq!(miner.stats().blocks_found, 0);
    }

    #[test]
    fn test_rejected_block_is_counted() {
        let peer = Arc::new(ShiftingPeer {
            inner: Node::standalone(ChainParams::new(0, 2)),
            polls: AtomicUsize::new(0),
        });
        let miner = Miner::new(KeyPair::generate(), vec![peer as Arc<dyn Peer>]);

        assert!(matches!(miner.mine_once(), Ok(AttemptOutcome::Rejected(_))));
        assert_eq!(miner.stats().blocks_found, 1);
        assert_eq!(miner.stats().blocks_accepted, 0);
    }
}
