//! A "mock" (totally local) network for passing consensus payloads between nodes.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};

use hotstuff_bft::types::data_types::Address;
use hotstuff_bft::Transport;

/// A transport stub that routes payloads between peers over channels.
///
/// The set of reachable peers is fixed when [`mock_network`] builds the mesh; sending to an
/// unknown peer is silently dropped, like a disconnected peer would be.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    peers: HashMap<Address, Sender<Vec<u8>>>,
}

impl Transport for NetworkStub {
    fn send(&mut self, peer: Address, payload: Vec<u8>) {
        if let Some(peer) = self.peers.get(&peer) {
            let _ = peer.send(payload);
        }
    }
}

/// Create a channel mesh connecting `peers`. The i-th returned stub and inbox belong to the
/// i-th peer.
pub(crate) fn mock_network(
    peers: impl Iterator<Item = Address>,
) -> Vec<(Address, NetworkStub, Receiver<Vec<u8>>)> {
    let mut senders = HashMap::new();
    let peer_inboxes: Vec<(Address, Receiver<Vec<u8>>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            senders.insert(peer, sender);
            (peer, receiver)
        })
        .collect();

    peer_inboxes
        .into_iter()
        .map(|(address, inbox)| {
            (
                address,
                NetworkStub {
                    peers: senders.clone(),
                },
                inbox,
            )
        })
        .collect()
}
