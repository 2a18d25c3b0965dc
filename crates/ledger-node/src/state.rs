//! The node's single owned state: chain, peer registry and gossip settings.
//!
//! Only the owner task touches a `NodeState`; everything else reaches it
//! through the command channel. Every handler runs to completion without
//! awaiting, so no invariant is ever observed half-updated.

use std::collections::HashSet;

use ledger_core::Chain;

use crate::constants::DEFAULT_GOSSIP_FANOUT;
use crate::protocol::PeerAddress;
use crate::registry::PeerRegistry;
use crate::validator::{StructuralValidator, TransactionValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipSettings {
    /// Peers per rebroadcast and per `peers` reply.
    pub fanout: usize,
    /// Validate linkage and proof-of-work before accepting a peer's block.
    pub strict_blocks: bool,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            fanout: DEFAULT_GOSSIP_FANOUT,
            strict_blocks: false,
        }
    }
}

pub struct NodeState {
    pub chain: Chain,
    pub peers: PeerRegistry,
    pub(crate) identity: PeerAddress,
    pub(crate) is_miner: bool,
    pub(crate) settings: GossipSettings,
    pub(crate) validator: Box<dyn TransactionValidator>,
    /// Outbound connections in flight, counted as known peers.
    pub(crate) dialing: HashSet<PeerAddress>,
}

impl NodeState {
    pub fn new(chain: Chain, identity: PeerAddress, is_miner: bool) -> Self {
        Self {
            chain,
            peers: PeerRegistry::new(),
            identity,
            is_miner,
            settings: GossipSettings::default(),
            validator: Box::new(StructuralValidator),
            dialing: HashSet::new(),
        }
    }

    pub fn with_settings(mut self, settings: GossipSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_validator(mut self, validator: impl TransactionValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn identity(&self) -> &PeerAddress {
        &self.identity
    }

    pub fn is_miner(&self) -> bool {
        self.is_miner
    }

    pub fn settings(&self) -> &GossipSettings {
        &self.settings
    }

    /// Known means this node itself, a registered peer or one being dialed.
    pub fn is_known(&self, address: &PeerAddress) -> bool {
        address == &self.identity || self.peers.contains(address) || self.dialing.contains(address)
    }
}
