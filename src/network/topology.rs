// Node registry and peer graph

use crate::consensus::ChainParams;
use crate::network::{Node, NodeId, NodeSummary, Peer};
use crate::storage::Utxo;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Every node of one simulated network, indexed by `NodeId`.
///
/// Nodes keep only a weak handle to the registry and name their peers by
/// id, so the peer graph holds no reference cycles.
pub struct Registry {
    nodes: Vec<Arc<Node>>,
}

impl Registry {
    pub fn get(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(id.0)
    }
}

/// A set of nodes sharing consensus parameters and genesis allocations
pub struct Network {
    registry: Arc<Registry>,
    params: ChainParams,
}

impl Network {
    /// Create `node_count` unconnected nodes
    pub fn new(node_count: usize, params: ChainParams) -> Self {
        let registry = Arc::new_cyclic(|weak| Registry {
            nodes: (0..node_count)
                .map(|i| Arc::new(Node::new(NodeId(i), params, weak.clone())))
                .collect(),
        });

        log::info!("Created network with {} nodes", node_count);
        Self { registry, params }
    }

    /// Create nodes connected in a ring lattice: node `i` links to the
    /// next `peer_connections` nodes, wrapping around.
    pub fn with_ring(node_count: usize, peer_connections: usize, params: ChainParams) -> Self {
        let network = Self::new(node_count, params);
        for i in 0..node_count {
            for offset in 1..=peer_connections {
                network.connect(NodeId(i), NodeId((i + offset) % node_count));
            }
        }
        log::info!(
            "Connected {} nodes in a ring ({} links)",
            node_count,
            network.edge_count()
        );
        network
    }

    /// Add an undirected link. Self-links and unknown ids are ignored.
    pub fn connect(&self, a: NodeId, b: NodeId) -> bool {
        match (self.registry.get(a), self.registry.get(b)) {
            (Some(node_a), Some(node_b)) if a != b => {
                let added = node_a.add_peer(b);
                node_b.add_peer(a);
                added
            }
            _ => false,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.registry.get(id).cloned()
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.registry.nodes
    }

    pub fn len(&self) -> usize {
        self.registry.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.nodes.is_empty()
    }

    /// Number of undirected links
    pub fn edge_count(&self) -> usize {
        self.nodes().iter().map(|n| n.peers().len()).sum::<usize>() / 2
    }

    /// Seed every node with the same initial allocations
    pub fn add_genesis_utxos(&self, utxos: &[Utxo]) {
        for node in self.nodes() {
            node.add_genesis_utxos(utxos.iter().cloned());
        }
    }

    /// Up to `count` distinct nodes picked at random, as peer handles
    pub fn random_peers(&self, count: usize) -> Vec<Arc<dyn Peer>> {
        self.nodes()
            .choose_multiple(&mut rand::thread_rng(), count)
            .map(|node| node.clone() as Arc<dyn Peer>)
            .collect()
    }

    /// All nodes agree on the tip
    pub fn is_converged(&self) -> bool {
        let mut tips = self.nodes().iter().map(|node| node.tip_hash());
        match tips.next() {
            Some(first) => tips.all(|tip| tip == first),
            None => true,
        }
    }

    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes().iter().map(|node| node.summary()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Block;
    use crate::test_utils::{mine, pay};
    use crate::wallet::KeyPair;

    const PARAMS: ChainParams = ChainParams {
        difficulty: 2,
        block_subsidy: 2,
    };

    #[test]
    fn test_ring_topology() {
        let network = Network::with_ring(5, 2, PARAMS);

        assert_eq!(network.len(), 5);
        assert_eq!(network.edge_count(), 10);
        for node in network.nodes() {
            assert_eq!(node.peers().len(), 4);
            assert!(!node.peers().contains(&node.id()));
        }
        assert!(network.is_converged());
    }

    #[test]
    fn test_connect_ignores_self_and_unknown() {
        let network = Network::new(2, PARAMS);
        assert!(!network.connect(NodeId(0), NodeId(0)));
        assert!(!network.connect(NodeId(0), NodeId(7)));
        assert!(network.connect(NodeId(0), NodeId(1)));
        assert!(!network.connect(NodeId(1), NodeId(0)));
        assert_eq!(network.edge_count(), 1);
    }

    #[test]
    fn test_random_peers_are_distinct() {
        let network = Network::new(4, PARAMS);
        let mut ids: Vec<NodeId> = network.random_peers(3).iter().map(|p| p.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert_eq!(network.random_peers(10).len(), 4);
    }

    #[test]
    fn test_transaction_floods_to_every_node() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let network = Network::with_ring(6, 1, PARAMS);
        network.add_genesis_utxos(&[Utxo::genesis(0, 50, alice.address.clone())]);

        let entry = network.node(NodeId(0)).unwrap();
        let tx = pay(&alice, &bob.address, 5, &entry.utxo_snapshot()).unwrap();
        assert!(entry.receive_transaction(tx.clone()));

        for node in network.nodes() {
            assert!(node.mempool_contains(&tx.txid));
        }
    }

    #[test]
    fn test_block_floods_and_network_converges() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate();
        let network = Network::with_ring(5, 1, PARAMS);
        network.add_genesis_utxos(&[Utxo::genesis(0, 50, alice.address.clone())]);

        let entry = network.node(NodeId(2)).unwrap();
        let tx = pay(&alice, &bob.address, 5, &entry.utxo_snapshot()).unwrap();
        entry.receive_transaction(tx);
        let block = mine(entry.block_template(), &miner.address);
        assert!(entry.receive_block(block.clone()));

        assert!(network.is_converged());
        for node in network.nodes() {
            assert_eq!(node.tip_hash(), block.hash());
            assert_eq!(node.balance(&bob.address), 5);
            assert_eq!(node.mempool_len(), 0);
            assert_eq!(node.summary().utxo_total, 50 + 2);
        }
    }

    #[test]
    fn test_competing_miners_converge_on_longer_chain() {
        let miner_a = KeyPair::generate();
        let miner_b = KeyPair::generate();
        let network = Network::new(4, PARAMS);
        // Two halves: {0, 1} and {2, 3}
        network.connect(NodeId(0), NodeId(1));
        network.connect(NodeId(2), NodeId(3));

        let left = network.node(NodeId(0)).unwrap();
        let right = network.node(NodeId(3)).unwrap();

        let a1 = mine(left.block_template(), &miner_a.address);
        assert!(left.receive_block(a1));
        let b1 = mine(right.block_template(), &miner_b.address);
        assert!(right.receive_block(b1));
        let b2 = mine(right.block_template(), &miner_b.address);
        assert!(right.receive_block(b2.clone()));
        assert!(!network.is_converged());

        // Heal the partition; the next block relayed across pulls the
        // shorter side over
        network.connect(NodeId(1), NodeId(2));
        let b3 = mine(right.block_template(), &miner_b.address);
        assert!(right.receive_block(b3.clone()));

        assert!(network.is_converged());
        for node in network.nodes() {
            assert_eq!(node.height(), 3);
            assert_eq!(node.tip_hash(), b3.hash());
            assert_eq!(node.balance(&miner_a.address), 0);
            assert_eq!(node.balance(&miner_b.address), 6);
        }
        // The losing block is remembered as a side branch
        assert_eq!(left.orphan_count(), 1);
    }

    #[test]
    fn test_reorg_returns_losing_payment_to_every_mempool() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner_a = KeyPair::generate();
        let miner_b = KeyPair::generate();
        let network = Network::new(4, PARAMS);
        network.add_genesis_utxos(&[Utxo::genesis(0, 50, alice.address.clone())]);
        network.connect(NodeId(0), NodeId(1));
        network.connect(NodeId(2), NodeId(3));

        let left = network.node(NodeId(0)).unwrap();
        let right = network.node(NodeId(3)).unwrap();

        // Both halves hear about the payment
        let tx = pay(&alice, &bob.address, 5, &left.utxo_snapshot()).unwrap();
        assert!(left.receive_transaction(tx.clone()));
        assert!(right.receive_transaction(tx.clone()));

        // Left confirms it, right outmines left with empty blocks
        let a1 = mine(left.block_template(), &miner_a.address);
        assert_eq!(a1.transactions.len(), 2);
        assert!(left.receive_block(a1));
        assert_eq!(network.node(NodeId(1)).unwrap().balance(&bob.address), 5);

        let empty_block = || {
            let mut template = right.block_template();
            template.transactions.clear();
            mine(template, &miner_b.address)
        };
        assert!(right.receive_block(empty_block()));
        assert!(right.receive_block(empty_block()));

        network.connect(NodeId(1), NodeId(2));
        let b3 = empty_block();
        assert!(right.receive_block(b3.clone()));

        assert!(network.is_converged());
        for node in network.nodes() {
            assert_eq!(node.tip_hash(), b3.hash());
            assert!(node.mempool_contains(&tx.txid));
            assert_eq!(node.balance(&bob.address), 0);
            assert_eq!(node.balance(&alice.address), 50);
        }

        // The payment is minable again on the winning chain
        let confirm = mine(left.block_template(), &miner_a.address);
        assert!(confirm.transactions.contains(&tx));
        assert!(left.receive_block(confirm.clone()));

        assert!(network.is_converged());
        for node in network.nodes() {
            assert_eq!(node.height(), 4);
            assert_eq!(node.tip_hash(), confirm.hash());
            assert_eq!(node.balance(&bob.address), 5);
            assert!(!node.mempool_contains(&tx.txid));
            assert_eq!(node.summary().utxo_total, 50 + 4 * 2);
        }
    }

    #[test]
    fn test_late_joiner_fetches_missing_ancestors() {
        let miner = KeyPair::generate();
        let network = Network::new(2, PARAMS);
        let veteran = network.node(NodeId(0)).unwrap();
        let newcomer = network.node(NodeId(1)).unwrap();

        let mut blocks: Vec<Block> = Vec::new();
        for _ in 0..3 {
            let block = mine(veteran.block_template(), &miner.address);
            assert!(veteran.receive_block(block.clone()));
            blocks.push(block);
        }

        // Only the tip is pushed; the parents come from getdata
        network.connect(NodeId(0), NodeId(1));
        assert!(newcomer.receive_block(blocks[2].clone()));
        assert_eq!(newcomer.chain(), veteran.chain());
        assert_eq!(newcomer.orphan_count(), 0);
    }
}
