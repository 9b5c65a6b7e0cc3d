//! Outbound side of consensus messaging.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::messages::{ConsensusMessage, MsgInfo};

/// Delivers our proposals, blocks and votes to the other validators.
/// Delivery is best effort; the machine never waits on it.
pub trait Gossip: Send + Sync {
    fn broadcast(&self, msg: ConsensusMessage);
}

/// For a node that talks to nobody.
#[derive(Debug, Default)]
pub struct NopGossip;

impl Gossip for NopGossip {
    fn broadcast(&self, _msg: ConsensusMessage) {}
}

struct Peer {
    id: String,
    inbox: mpsc::Sender<MsgInfo>,
    connected: bool,
}

/// In-process network. Every connected node receives what any other node
/// broadcasts, tagged with the sender's id.
#[derive(Default)]
pub struct LocalNetwork {
    peers: Mutex<Vec<Peer>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalNetwork::default())
    }

    /// Join the network with `inbox` as the node's peer queue.
    pub fn join(self: &Arc<Self>, id: impl Into<String>, inbox: mpsc::Sender<MsgInfo>) -> LocalGossip {
        let id = id.into();
        if let Ok(mut peers) = self.peers.lock() {
            peers.retain(|p| p.id != id);
            peers.push(Peer {
                id: id.clone(),
                inbox,
                connected: true,
            });
        }
        LocalGossip {
            id,
            network: Arc::clone(self),
        }
    }

    /// Cut a node off in both directions until `reconnect`.
    pub fn disconnect(&self, id: &str) {
        self.set_connected(id, false);
    }

    pub fn reconnect(&self, id: &str) {
        self.set_connected(id, true);
    }

    fn set_connected(&self, id: &str, connected: bool) {
        if let Ok(mut peers) = self.peers.lock() {
            for peer in peers.iter_mut().filter(|p| p.id == id) {
                peer.connected = connected;
            }
        }
    }

    fn deliver(&self, from: &str, msg: &ConsensusMessage) {
        let Ok(peers) = self.peers.lock() else {
            return;
        };
        if !peers.iter().any(|p| p.id == from && p.connected) {
            trace!(from, "sender disconnected, dropping broadcast");
            return;
        }
        for peer in peers.iter().filter(|p| p.id != from && p.connected) {
            if let Err(e) = peer.inbox.try_send(MsgInfo::from_peer(msg.clone(), from)) {
                warn!(from, to = %peer.id, error = %e, "dropping consensus message");
            }
        }
    }
}

pub struct LocalGossip {
    id: String,
    network: Arc<LocalNetwork>,
}

impl LocalGossip {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Gossip for LocalGossip {
    fn broadcast(&self, msg: ConsensusMessage) {
        self.network.deliver(&self.id, &msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_core::{BlockId, KeyPair, Sig, Vote, VoteType};

    fn msg() -> ConsensusMessage {
        ConsensusMessage::Vote(Vote {
            vote_type: VoteType::Prevote,
            height: 1,
            round: 0,
            block_id: BlockId::nil(),
            timestamp: 0,
            validator_address: KeyPair::from_secret_bytes(&[1; 32]).public,
            validator_index: 0,
            signature: Sig::default(),
        })
    }

    #[tokio::test]
    async fn test_broadcast_reaches_others_only() {
        let net = LocalNetwork::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = net.join("a", tx_a);
        let _b = net.join("b", tx_b);

        a.broadcast(msg());
        let got = rx_b.recv().await.unwrap();
        assert_eq!(got.peer_id.as_deref(), Some("a"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_node_is_isolated() {
        let net = LocalNetwork::new();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = net.join("a", tx_a);
        let _b = net.join("b", tx_b);

        net.disconnect("a");
        a.broadcast(msg());
        assert!(rx_b.try_recv().is_err());

        net.reconnect("a");
        a.broadcast(msg());
        assert!(rx_b.recv().await.is_some());
    }
}
