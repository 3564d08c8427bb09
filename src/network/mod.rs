// P2P gossip between in-process nodes

mod message;
mod node;
mod peer;
mod topology;

pub use message::{Message, MessageType};
pub use node::{Node, NodeSummary};
pub use peer::{NodeId, Peer};
pub use topology::{Network, Registry};
