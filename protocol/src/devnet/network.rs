//! In-process peer transport and keypair signing for the devnet.
//!
//! [`LocalNetwork`] routes a message to every joined peer whose role mask
//! intersects the target mask, except the sender. Delivery is an unbounded
//! channel send, so it never blocks the consensus core.
//!
//! Links can be cut per direction to simulate partitions. A message over a
//! cut link is dropped silently.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::trace;

use crate::consensus::error::SignError;
use crate::consensus::messages::ConsensusMessage;
use crate::consensus::role::RoleMask;
use crate::consensus::traits::{PeerMessenger, SigningService};
use crate::crypto::hash::signing_message;
use crate::crypto::keys::{Signature, ValidatorKeypair};
use crate::types::{Address, Hash};

// ---------------------------------------------------------------------------
// LocalNetwork
// ---------------------------------------------------------------------------

struct Peer {
    roles: RoleMask,
    inbox: mpsc::UnboundedSender<ConsensusMessage>,
}

/// Role-routed message bus shared by every in-process node.
#[derive(Default)]
pub struct LocalNetwork {
    peers: DashMap<Address, Peer>,
    delivered: DashMap<&'static str, u64>,
    /// Cut links as `(from, to)`.
    partitions: DashSet<(Address, Address)>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `address` with `roles` and returns its inbox. Joining
    /// again replaces the previous inbox.
    pub fn join(&self, address: Address, roles: RoleMask) -> mpsc::UnboundedReceiver<ConsensusMessage> {
        let (inbox, rx) = mpsc::unbounded_channel();
        self.peers.insert(address, Peer { roles, inbox });
        rx
    }

    pub fn leave(&self, address: &Address) {
        self.peers.remove(address);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Messages of `kind` delivered so far, across all peers.
    pub fn delivered(&self, kind: &str) -> u64 {
        self.delivered.get(kind).map(|n| *n.value()).unwrap_or(0)
    }

    /// Drops every message from `from` to `to` until healed.
    pub fn partition_unidirectional(&self, from: Address, to: Address) {
        self.partitions.insert((from, to));
    }

    /// Cuts both directions between `node` and every joined peer.
    pub fn isolate(&self, node: Address) {
        for peer in self.peers.iter() {
            if *peer.key() != node {
                self.partitions.insert((node, *peer.key()));
                self.partitions.insert((*peer.key(), node));
            }
        }
    }

    pub fn heal_all(&self) {
        self.partitions.clear();
    }

    pub fn is_partitioned(&self, from: &Address, to: &Address) -> bool {
        self.partitions.contains(&(*from, *to))
    }

    /// Delivers `message` from `from` to every matching peer.
    pub fn broadcast(&self, from: &Address, message: ConsensusMessage, roles: RoleMask) {
        let kind = message.kind();
        let mut sent = 0u64;
        for peer in self.peers.iter() {
            if peer.key() == from
                || !peer.value().roles.intersects(roles)
                || self.is_partitioned(from, peer.key())
            {
                continue;
            }
            if peer.value().inbox.send(message.clone()).is_ok() {
                sent += 1;
            }
        }
        *self.delivered.entry(kind).or_insert(0) += sent;
        trace!(from = %from, kind, peers = sent, "message routed");
    }

    /// Delivers `message` from `from` to `to` only.
    pub fn send_to(&self, from: &Address, to: &Address, message: ConsensusMessage) -> bool {
        if from == to || self.is_partitioned(from, to) {
            return false;
        }
        let kind = message.kind();
        let sent = self
            .peers
            .get(to)
            .is_some_and(|peer| peer.inbox.send(message).is_ok());
        if sent {
            *self.delivered.entry(kind).or_insert(0) += 1;
        }
        trace!(from = %from, to = %to, kind, sent, "direct message");
        sent
    }

    /// A messenger that sends as `address`.
    pub fn messenger(self: &Arc<Self>, address: Address) -> NetworkHandle {
        NetworkHandle {
            network: Arc::clone(self),
            me: address,
        }
    }
}

/// [`PeerMessenger`] bound to one sender address.
#[derive(Clone)]
pub struct NetworkHandle {
    network: Arc<LocalNetwork>,
    me: Address,
}

impl NetworkHandle {
    pub fn address(&self) -> Address {
        self.me
    }

    /// Sends `message` to one peer.
    pub fn send_to(&self, peer: &Address, message: ConsensusMessage) -> bool {
        self.network.send_to(&self.me, peer, message)
    }
}

impl PeerMessenger for NetworkHandle {
    fn send_to_role(&self, message: ConsensusMessage, roles: RoleMask) {
        self.network.broadcast(&self.me, message, roles);
    }
}

// ---------------------------------------------------------------------------
// KeypairSigner
// ---------------------------------------------------------------------------

/// Signs `signing_message(hash, parent_hash)` with an Ed25519 keypair.
#[derive(Debug, Clone)]
pub struct KeypairSigner {
    keypair: ValidatorKeypair,
}

impl KeypairSigner {
    pub fn new(keypair: ValidatorKeypair) -> Self {
        Self { keypair }
    }
}

impl SigningService for KeypairSigner {
    fn address(&self) -> Address {
        self.keypair.address()
    }

    fn sign_with_context(&self, hash: &Hash, parent_hash: &Hash) -> Result<Signature, SignError> {
        let message = signing_message(hash, parent_hash);
        Ok(self.keypair.sign(message.as_bytes()))
    }

    fn verify_signature(
        &self,
        hash: &Hash,
        signature: &Signature,
        parent_hash: &Hash,
    ) -> (Address, bool) {
        let message = signing_message(hash, parent_hash);
        (signature.signer(), signature.verify(message.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::messages::VoteMessage;
    use crate::consensus::role::Role;

    fn vote() -> ConsensusMessage {
        let kp = ValidatorKeypair::from_seed(&[1; 32]);
        ConsensusMessage::Vote(VoteMessage {
            height: 1,
            sign_hash: Hash([1; 32]),
            signature: kp.sign(b"v"),
            from: kp.address(),
        })
    }

    #[test]
    fn routes_by_role_and_skips_sender() {
        let network = LocalNetwork::new();
        let a = Address([1; 20]);
        let b = Address([2; 20]);
        let c = Address([3; 20]);
        let mut rx_a = network.join(a, RoleMask::VALIDATOR);
        let mut rx_b = network.join(b, RoleMask::VALIDATOR | RoleMask::MINER);
        let mut rx_c = network.join(c, RoleMask::from(Role::Follower));

        network.messenger(a).send_to_role(vote(), RoleMask::VALIDATOR);
        assert!(rx_a.try_recv().is_err(), "sender excluded");
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err(), "role filtered");
        assert_eq!(network.delivered("vote"), 1);

        network.leave(&b);
        network.messenger(a).send_to_role(vote(), RoleMask::MINER);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(network.peer_count(), 2);
    }

    #[test]
    fn partitions_cut_single_directions() {
        let network = LocalNetwork::new();
        let a = Address([1; 20]);
        let b = Address([2; 20]);
        let mut rx_a = network.join(a, RoleMask::VALIDATOR);
        let mut rx_b = network.join(b, RoleMask::VALIDATOR);

        network.partition_unidirectional(a, b);
        network.messenger(a).send_to_role(vote(), RoleMask::VALIDATOR);
        assert!(rx_b.try_recv().is_err(), "a -> b cut");
        assert!(network.messenger(b).send_to(&a, vote()));
        assert!(rx_a.try_recv().is_ok(), "b -> a open");

        network.heal_all();
        network.isolate(b);
        assert!(!network.messenger(a).send_to(&b, vote()));
        assert!(!network.messenger(b).send_to(&a, vote()));

        network.heal_all();
        assert!(network.messenger(a).send_to(&b, vote()));
        assert!(rx_b.try_recv().is_ok());
        assert!(!network.messenger(a).send_to(&a, vote()), "never to self");
    }

    #[test]
    fn signatures_bind_the_parent() {
        let signer = KeypairSigner::new(ValidatorKeypair::from_seed(&[4; 32]));
        let hash = Hash([1; 32]);
        let parent = Hash([2; 32]);
        let sig = signer.sign_with_context(&hash, &parent).expect("sign");

        assert_eq!(signer.verify_signature(&hash, &sig, &parent), (signer.address(), true));
        let (who, ok) = signer.verify_signature(&hash, &sig, &Hash([3; 32]));
        assert_eq!(who, signer.address());
        assert!(!ok, "other fork");
    }
}
