// Network node - validates, stores and gossips blocks and transactions

use crate::consensus::{BlockValidator, ChainParams, TransactionValidator};
use crate::core::{Address, Block, Hash256, Transaction};
use crate::network::{Message, NodeId, Peer, Registry};
use crate::storage::{BlockTemplate, ChainState, Utxo, UtxoSet};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

/// Where an incoming block ended up
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    /// Canonical chain changed; the blocks that became canonical
    Connected(Vec<Block>),
    /// Stored on a branch no longer than the canonical chain
    SideBranch,
    /// Some ancestor is unknown
    Orphaned { missing: Hash256 },
    Rejected,
}

/// Result of integrating a block and any buffered descendants
#[derive(Debug, Default)]
struct Acceptance {
    /// Blocks that joined the canonical chain, in order
    connected: Vec<Block>,
    missing: Option<Hash256>,
}

/// Mutable node state, guarded by one lock
struct NodeState {
    chain: ChainState,
    validator: BlockValidator,
    seen_transactions: HashSet<Hash256>,
    seen_blocks: HashSet<Hash256>,
    /// Valid blocks off the canonical chain, keyed by hash
    orphans: HashMap<Hash256, Block>,
}

impl NodeState {
    fn new(params: ChainParams) -> Self {
        Self {
            chain: ChainState::new(params),
            validator: BlockValidator::new(params),
            seen_transactions: HashSet::new(),
            seen_blocks: HashSet::new(),
            orphans: HashMap::new(),
        }
    }

    /// Integrate a block, then every buffered descendant it unlocks
    fn accept(&mut self, block: Block) -> Acceptance {
        let mut acceptance = Acceptance::default();
        let mut queue = VecDeque::new();

        let hash = block.hash();
        match self.place(block) {
            Placement::Connected(blocks) => {
                acceptance.connected.extend(blocks);
                queue.push_back(hash);
            }
            Placement::SideBranch => queue.push_back(hash),
            Placement::Orphaned { missing } => acceptance.missing = Some(missing),
            Placement::Rejected => {}
        }

        while let Some(parent) = queue.pop_front() {
            let children: Vec<Hash256> = self
                .orphans
                .iter()
                .filter(|(_, orphan)| orphan.prev_hash() == parent)
                .map(|(hash, _)| *hash)
                .collect();

            for child_hash in children {
                let Some(child) = self.orphans.remove(&child_hash) else {
                    continue;
                };
                match self.place(child) {
                    Placement::Connected(blocks) => {
                        acceptance.connected.extend(blocks);
                        queue.push_back(child_hash);
                    }
                    Placement::SideBranch => queue.push_back(child_hash),
                    Placement::Orphaned { .. } | Placement::Rejected => {}
                }
            }
        }

        acceptance
    }

    /// Decide where a consensus-valid block belongs
    fn place(&mut self, block: Block) -> Placement {
        let hash = block.hash();
        let prev = block.prev_hash();

        if prev == self.chain.tip_hash() {
            return match self.chain.append_block(&block) {
                Ok(()) => {
                    log::debug!("Extended chain to height {} with {}", block.height(), hash);
                    Placement::Connected(vec![block])
                }
                Err(e) => {
                    // Forget it so a descendant can fetch it again once the
                    // missing transactions have arrived
                    log::debug!("Block {} does not apply: {}", hash, e);
                    self.seen_blocks.remove(&hash);
                    Placement::Rejected
                }
            };
        }

        if !self.chain.contains_block(&prev) && !self.orphans.contains_key(&prev) {
            self.orphans.insert(hash, block);
            return Placement::Orphaned { missing: prev };
        }

        let candidate = match self.alternative_chain(&block) {
            Ok(candidate) => candidate,
            Err(missing) => {
                self.orphans.insert(hash, block);
                return Placement::Orphaned { missing };
            }
        };

        if candidate.len() <= self.chain.len() {
            log::debug!(
                "Stored side-branch block {} (branch length {}, ours {})",
                hash,
                candidate.len(),
                self.chain.len()
            );
            self.orphans.insert(hash, block);
            return Placement::SideBranch;
        }

        let fork = candidate
            .iter()
            .take_while(|b| self.chain.contains_block(&b.hash()))
            .count();
        if self.switch_to_chain(&candidate) {
            Placement::Connected(candidate[fork..].to_vec())
        } else {
            self.seen_blocks.remove(&hash);
            Placement::Rejected
        }
    }

    /// Walk back through buffered blocks until the canonical chain is
    /// reached. Returns the full candidate chain or the first unknown hash.
    fn alternative_chain(&self, block: &Block) -> Result<Vec<Block>, Hash256> {
        let mut branch = vec![block.clone()];
        let mut cursor = block.prev_hash();

        loop {
            if let Some(pos) = self.chain.position(&cursor) {
                let mut candidate = self.chain.chain()[..=pos].to_vec();
                candidate.extend(branch.into_iter().rev());
                return Ok(candidate);
            }

            match self.orphans.get(&cursor) {
                Some(parent) if branch.len() <= self.orphans.len() => {
                    cursor = parent.prev_hash();
                    branch.push(parent.clone());
                }
                _ => return Err(cursor),
            }
        }
    }

    /// Adopt `candidate` (genesis first) if every block links, passes
    /// consensus checks and replays cleanly. All or nothing.
    fn switch_to_chain(&mut self, candidate: &[Block]) -> bool {
        for pair in candidate.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            if child.prev_hash() != parent.hash() || child.height() != parent.height() + 1 {
                log::debug!("Candidate chain broken at height {}", child.height());
                return false;
            }
            if let Err(e) = self.validator.validate_block(child) {
                log::debug!("Candidate block {} invalid: {}", child.hash(), e);
                return false;
            }
        }

        let old_height = self.chain.height();
        match self.chain.replace_chain(candidate) {
            Ok(abandoned) => {
                log::info!(
                    "Reorganized from height {} to {} ({} blocks abandoned)",
                    old_height,
                    self.chain.height(),
                    abandoned.len()
                );
                let chain = &self.chain;
                self.orphans.retain(|hash, _| !chain.contains_block(hash));
                for block in abandoned {
                    self.orphans.insert(block.hash(), block);
                }
                true
            }
            Err(e) => {
                log::warn!("Chain switch failed, state kept: {}", e);
                false
            }
        }
    }

    fn find_block(&self, hash: &Hash256) -> Option<Block> {
        self.chain
            .get_block(hash)
            .or_else(|| self.orphans.get(hash))
            .cloned()
    }
}

/// Point-in-time view of a node for reports
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub height: u64,
    pub tip: Hash256,
    pub mempool_size: usize,
    pub orphan_count: usize,
    pub utxo_total: u64,
}

/// A full node: one chain state plus gossip to its neighbors
pub struct Node {
    id: NodeId,
    registry: Weak<Registry>,
    peers: RwLock<BTreeSet<NodeId>>,
    state: Mutex<NodeState>,
}

impl Node {
    pub(crate) fn new(id: NodeId, params: ChainParams, registry: Weak<Registry>) -> Self {
        Self {
            id,
            registry,
            peers: RwLock::new(BTreeSet::new()),
            state: Mutex::new(NodeState::new(params)),
        }
    }

    /// A node outside any network. It never relays.
    pub fn standalone(params: ChainParams) -> Arc<Self> {
        Arc::new(Self::new(NodeId(0), params, Weak::new()))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.peers.read().iter().copied().collect()
    }

    pub(crate) fn add_peer(&self, peer: NodeId) -> bool {
        peer != self.id && self.peers.write().insert(peer)
    }

    pub fn add_genesis_utxos(&self, utxos: impl IntoIterator<Item = Utxo>) {
        self.state.lock().chain.add_genesis_utxos(utxos);
    }

    /// Accept a transaction into the mempool and relay it.
    ///
    /// Returns `true` only the first time a valid transaction is offered.
    pub fn receive_transaction(&self, tx: Transaction) -> bool {
        let txid = tx.txid;
        {
            let mut state = self.state.lock();
            if !state.seen_transactions.insert(txid) {
                return false;
            }
            if let Err(e) = TransactionValidator::validate_for_mempool(&tx) {
                log::debug!("{} rejected tx {}: {}", self.id, txid, e);
                return false;
            }
            state.chain.add_transaction(tx.clone());
        }

        log::debug!("{} accepted tx {}", self.id, txid);
        for peer in self.neighbors() {
            if !peer.has_seen_transaction(&txid) {
                peer.deliver(Message::Tx(tx.clone()));
            }
        }
        true
    }

    /// Validate a block and integrate it: extend the tip, buffer it as an
    /// orphan or side branch, or switch to a longer fork it completes.
    ///
    /// Every block that becomes canonical is flooded to all neighbors, and a
    /// missing ancestor is requested from them. Returns `true` if this call
    /// changed the canonical chain.
    pub fn receive_block(&self, block: Block) -> bool {
        let hash = block.hash();
        let acceptance = {
            let mut state = self.state.lock();
            if !state.seen_blocks.insert(hash) {
                return false;
            }
            if let Err(e) = state.validator.validate_block(&block) {
                log::debug!("{} rejected block {}: {}", self.id, hash, e);
                return false;
            }
            state.accept(block)
        };

        if let Some(tip) = acceptance.connected.last() {
            log::info!("{} now at height {} (tip {})", self.id, tip.height(), tip.hash());
        }
        for connected in &acceptance.connected {
            self.broadcast(Message::Block(connected.clone()));
        }

        let fetched = match acceptance.missing {
            Some(missing) => self.request_block(&missing),
            None => false,
        };

        !acceptance.connected.is_empty() || fetched
    }

    /// Ask neighbors for a block we lack and feed the answer back in
    fn request_block(&self, hash: &Hash256) -> bool {
        log::debug!("{} requesting missing block {}", self.id, hash);
        for peer in self.neighbors() {
            if let Some(block) = peer.find_block(hash) {
                return self.receive_block(block);
            }
        }
        false
    }

    /// Adopt a complete candidate chain (genesis first) if it is valid
    /// throughout. On failure nothing changes.
    pub fn switch_to_chain(&self, candidate: &[Block]) -> bool {
        self.state.lock().switch_to_chain(candidate)
    }

    pub fn has_seen_transaction(&self, txid: &Hash256) -> bool {
        self.state.lock().seen_transactions.contains(txid)
    }

    pub fn has_seen_block(&self, hash: &Hash256) -> bool {
        self.state.lock().seen_blocks.contains(hash)
    }

    pub fn find_block(&self, hash: &Hash256) -> Option<Block> {
        self.state.lock().find_block(hash)
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.state.lock().chain.tip_hash()
    }

    pub fn height(&self) -> u64 {
        self.state.lock().chain.height()
    }

    /// Copy of the canonical chain, genesis first
    pub fn chain(&self) -> Vec<Block> {
        self.state.lock().chain.chain().to_vec()
    }

    pub fn block_template(&self) -> BlockTemplate {
        self.state.lock().chain.block_template()
    }

    pub fn utxo_snapshot(&self) -> UtxoSet {
        self.state.lock().chain.utxo_set().clone()
    }

    pub fn balance(&self, owner: &Address) -> u64 {
        self.state.lock().chain.balance(owner)
    }

    pub fn mempool_contains(&self, txid: &Hash256) -> bool {
        self.state.lock().chain.mempool().contains(txid)
    }

    pub fn mempool_len(&self) -> usize {
        self.state.lock().chain.mempool().len()
    }

    pub fn orphan_count(&self) -> usize {
        self.state.lock().orphans.len()
    }

    pub fn summary(&self) -> NodeSummary {
        let state = self.state.lock();
        NodeSummary {
            id: self.id,
            height: state.chain.height(),
            tip: state.chain.tip_hash(),
            mempool_size: state.chain.mempool().len(),
            orphan_count: state.orphans.len(),
            utxo_total: state.chain.utxo_set().total_value(),
        }
    }

    /// Resolve neighbor ids against the registry. Empty for standalone nodes.
    fn neighbors(&self) -> Vec<Arc<Node>> {
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };
        self.peers
            .read()
            .iter()
            .filter_map(|id| registry.get(*id).cloned())
            .collect()
    }

    fn broadcast(&self, message: Message) {
        let neighbors = self.neighbors();
        log::trace!(
            "{} relaying {} {} to {} peers",
            self.id,
            message.message_type().as_str(),
            message.inventory_hash(),
            neighbors.len()
        );
        for peer in neighbors {
            peer.deliver(message.clone());
        }
    }
}

impl Peer for Node {
    fn id(&self) -> NodeId {
        self.id
    }

    fn receive_transaction(&self, tx: Transaction) -> bool {
        Node::receive_transaction(self, tx)
    }

    fn receive_block(&self, block: Block) -> bool {
        Node::receive_block(self, block)
    }

    fn has_seen_transaction(&self, txid: &Hash256) -> bool {
        Node::has_seen_transaction(self, txid)
    }

    fn find_block(&self, hash: &Hash256) -> Option<Block> {
        Node::find_block(self, hash)
    }

    fn tip_hash(&self) -> Hash256 {
        Node::tip_hash(self)
    }

    fn block_template(&self) -> BlockTemplate {
        Node::block_template(self)
    }

    fn utxo_snapshot(&self) -> UtxoSet {
        Node::utxo_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxOutput;
    use crate::test_utils::{mine, pay, solve};
    use crate::wallet::KeyPair;

    const PARAMS: ChainParams = ChainParams {
        difficulty: 2,
        block_subsidy: 2,
    };

    fn funded_node(owner: &Address) -> Arc<Node> {
        let node = Node::standalone(PARAMS);
        node.add_genesis_utxos(vec![Utxo::genesis(0, 50, owner.clone())]);
        node
    }

    /// Same genesis allocation, independent state
    fn twin(node: &Node) -> Arc<Node> {
        let twin = Node::standalone(PARAMS);
        twin.add_genesis_utxos(node.state.lock().chain.genesis_utxos().iter().cloned());
        twin
    }

    /// Mine `count` empty blocks on top of `node`
    fn extend(node: &Node, count: usize, miner: &Address) -> Vec<Block> {
        (0..count)
            .map(|_| {
                let block = mine(node.block_template(), miner);
                assert!(node.receive_block(block.clone()));
                block
            })
            .collect()
    }

    #[test]
    fn test_receive_transaction_is_idempotent() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let node = funded_node(&alice.address);
        let tx = pay(&alice, &bob.address, 5, &node.utxo_snapshot()).unwrap();

        assert!(node.receive_transaction(tx.clone()));
        assert!(!node.receive_transaction(tx.clone()));
        assert_eq!(node.mempool_len(), 1);
        assert!(node.has_seen_transaction(&tx.txid));
    }

    #[test]
    fn test_forged_transaction_rejected() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let node = funded_node(&alice.address);

        // Mallory signs a spend of Alice's output
        let mut tx = pay(&alice, &mallory.address, 5, &node.utxo_snapshot()).unwrap();
        tx.sign(&mallory.secret_key);

        assert!(!node.receive_transaction(tx.clone()));
        assert_eq!(node.mempool_len(), 0);
        // Still marked as seen
        assert!(!node.receive_transaction(tx));
    }

    #[test]
    fn test_overflowing_transaction_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let node = funded_node(&alice.address);

        let mut tx = Transaction::new(
            alice.address.clone(),
            bob.address.clone(),
            1,
            vec![
                Utxo::new(Hash256::new([1; 32]), 0, u64::MAX, alice.address.clone()),
                Utxo::new(Hash256::new([2; 32]), 0, u64::MAX, alice.address.clone()),
            ],
            vec![TxOutput::new(bob.address.clone(), 1)],
        );
        tx.sign(&alice.secret_key);

        assert!(!node.receive_transaction(tx));
        assert_eq!(node.mempool_len(), 0);
    }

    #[test]
    fn test_receive_block_extends_chain() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate();
        let node = funded_node(&alice.address);

        let tx = pay(&alice, &bob.address, 5, &node.utxo_snapshot()).unwrap();
        node.receive_transaction(tx);
        let block = mine(node.block_template(), &miner.address);

        assert!(node.receive_block(block.clone()));
        assert!(!node.receive_block(block.clone()));
        assert_eq!(node.height(), 1);
        assert_eq!(node.tip_hash(), block.hash());
        assert_eq!(node.mempool_len(), 0);
        assert_eq!(node.balance(&bob.address), 5);
        assert_eq!(node.balance(&miner.address), 3);
        assert_eq!(node.summary().utxo_total, 52);
    }

    #[test]
    fn test_invalid_block_rejected() {
        let miner = KeyPair::generate();
        let node = Node::standalone(ChainParams::new(12, 2));

        // Unsolved at difficulty 12 unless we are very lucky
        let mut block = node.block_template().into_block(&miner.address);
        while crate::consensus::is_valid_proof(&block.hash(), 12) {
            block.header.nonce += 1;
        }

        assert!(!node.receive_block(block.clone()));
        assert_eq!(node.height(), 0);
        assert_eq!(node.orphan_count(), 0);
        assert!(node.find_block(&block.hash()).is_none());
    }

    #[test]
    fn test_orphan_is_connected_when_parent_arrives() {
        let miner = KeyPair::generate();
        let source = Node::standalone(PARAMS);
        let blocks = extend(&source, 2, &miner.address);

        let node = twin(&source);
        assert!(!node.receive_block(blocks[1].clone()));
        assert_eq!(node.orphan_count(), 1);
        assert_eq!(node.height(), 0);

        assert!(node.receive_block(blocks[0].clone()));
        assert_eq!(node.height(), 2);
        assert_eq!(node.tip_hash(), blocks[1].hash());
        assert_eq!(node.orphan_count(), 0);
    }

    #[test]
    fn test_equal_length_fork_keeps_current_chain() {
        let miner_a = KeyPair::generate();
        let miner_b = KeyPair::generate();
        let node = Node::standalone(PARAMS);
        let rival = twin(&node);

        let ours = extend(&node, 1, &miner_a.address);
        let theirs = extend(&rival, 1, &miner_b.address);

        assert!(!node.receive_block(theirs[0].clone()));
        assert_eq!(node.tip_hash(), ours[0].hash());
        assert_eq!(node.orphan_count(), 1);
        assert_eq!(node.find_block(&theirs[0].hash()), Some(theirs[0].clone()));
    }

    #[test]
    fn test_longer_fork_triggers_reorg() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner_a = KeyPair::generate();
        let miner_b = KeyPair::generate();
        let node = funded_node(&alice.address);
        let rival = twin(&node);

        // Our chain confirms a payment the rival never saw
        let tx = pay(&alice, &bob.address, 5, &node.utxo_snapshot()).unwrap();
        node.receive_transaction(tx.clone());
        let ours = extend(&node, 1, &miner_a.address);
        assert_eq!(node.balance(&bob.address), 5);

        let theirs = extend(&rival, 2, &miner_b.address);
        assert!(!node.receive_block(theirs[0].clone()));
        assert!(node.receive_block(theirs[1].clone()));

        assert_eq!(node.height(), 2);
        assert_eq!(node.tip_hash(), theirs[1].hash());
        assert_eq!(node.utxo_snapshot(), rival.utxo_snapshot());
        assert_eq!(node.balance(&bob.address), 0);
        assert_eq!(node.balance(&miner_a.address), 0);
        // The abandoned payment is pending again and the old block is kept
        assert!(node.mempool_contains(&tx.txid));
        assert_eq!(node.find_block(&ours[0].hash()), Some(ours[0].clone()));
        assert_eq!(node.orphan_count(), 1);
    }

    #[test]
    fn test_orphan_chain_completing_longer_fork() {
        let miner_a = KeyPair::generate();
        let miner_b = KeyPair::generate();
        let node = Node::standalone(PARAMS);
        let rival = twin(&node);

        extend(&node, 1, &miner_a.address);
        let theirs = extend(&rival, 3, &miner_b.address);

        // Descendants first, then the fork point
        assert!(!node.receive_block(theirs[2].clone()));
        assert!(!node.receive_block(theirs[1].clone()));
        assert_eq!(node.orphan_count(), 2);

        assert!(node.receive_block(theirs[0].clone()));
        assert_eq!(node.height(), 3);
        assert_eq!(node.tip_hash(), theirs[2].hash());
        assert_eq!(node.chain(), rival.chain());
    }

    #[test]
    fn test_switch_to_chain_is_atomic() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate();
        let node = funded_node(&alice.address);
        let ours = extend(&node, 1, &miner.address);

        // Valid PoW, but spends an output nobody has
        let rival = twin(&node);
        let r1 = extend(&rival, 1, &miner.address).remove(0);
        let mut phantom = UtxoSet::new();
        phantom.add_utxo(Utxo::new(Hash256::new([9; 32]), 0, 80, alice.address.clone()));
        let bogus = pay(&alice, &bob.address, 5, &phantom).unwrap();
        let mut template = rival.block_template();
        template.transactions.push(bogus);
        let r2 = mine(template, &miner.address);

        let before = node.summary();
        assert!(!node.switch_to_chain(&[Block::genesis(), r1.clone(), r2]));
        assert_eq!(node.tip_hash(), ours[0].hash());
        assert_eq!(node.summary().utxo_total, before.utxo_total);
        assert_eq!(node.mempool_len(), before.mempool_size);

        // Broken link
        let mut unlinked = r1.clone();
        unlinked.header.prev_block_hash = Hash256::new([1; 32]);
        let unlinked = solve(unlinked);
        assert!(!node.switch_to_chain(&[Block::genesis(), unlinked]));
        assert_eq!(node.tip_hash(), ours[0].hash());
    }

    #[test]
    fn test_switch_to_chain_rejects_bad_proof_of_work() {
        let miner = KeyPair::generate();
        let node = Node::standalone(ChainParams::new(12, 2));
        let rival = Node::standalone(ChainParams::new(12, 2));
        let mut blocks = extend(&rival, 2, &miner.address);

        while crate::consensus::is_valid_proof(&blocks[1].hash(), 12) {
            blocks[1].header.nonce += 1;
        }
        let candidate = vec![Block::genesis(), blocks[0].clone(), blocks[1].clone()];
        assert!(!node.switch_to_chain(&candidate));
        assert_eq!(node.height(), 0);
    }

    #[test]
    fn test_block_waiting_on_transaction_can_be_redelivered() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate();
        let source = funded_node(&alice.address);
        let node = twin(&source);

        let tx = pay(&alice, &bob.address, 5, &source.utxo_snapshot()).unwrap();
        source.receive_transaction(tx.clone());
        let block = mine(source.block_template(), &miner.address);
        assert!(source.receive_block(block.clone()));

        // The payment has not reached this node yet
        assert!(!node.receive_block(block.clone()));
        assert!(!node.has_seen_block(&block.hash()));
        assert_eq!(node.height(), 0);

        assert!(node.receive_transaction(tx));
        assert!(node.receive_block(block.clone()));
        assert_eq!(node.tip_hash(), block.hash());
        assert_eq!(node.balance(&bob.address), 5);
    }
}
