//! Gossip protocol dispatcher.
//!
//! Translates each inbound message into chain and registry operations plus the
//! replies and rebroadcasts it triggers. Holds no state of its own; everything
//! lives in [`NodeState`].

use ledger_core::{Block, Transaction};
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::protocol::{Envelope, Message, PeerAddress, Peers, Ping};
use crate::registry::{ConnectionId, PeerHandle};
use crate::state::NodeState;

/// Opens outbound connections. The result comes back later through
/// [`NodeState::on_connected`] or [`NodeState::on_dial_failed`].
pub trait Dialer {
    fn dial(&mut self, address: PeerAddress);
}

impl NodeState {
    /// Registers the connection under the sender's advertised address, then
    /// dispatches the message.
    pub fn on_envelope(&mut self, envelope: Envelope, origin: &PeerHandle, dialer: &mut impl Dialer) {
        let Envelope { message, sender } = envelope;
        self.peers.add_peer(sender.clone(), origin.clone());

        match message {
            Message::Ping(ping) => self.handle_ping(&sender, ping, origin),
            Message::Peers(peers) => self.handle_peers(peers, dialer),
            Message::Transaction(tx) => {
                self.handle_transaction(tx, Some(&sender));
            }
            Message::Block(block) => {
                self.handle_block(block, Some(&sender));
            }
        }
    }

    /// Replies with known peers, then streams every block the sender lacks.
    fn handle_ping(&mut self, sender: &PeerAddress, ping: Ping, origin: &PeerHandle) {
        debug!(peer = %sender, height = ping.block_height, is_miner = ping.is_miner, "Received ping");
        self.peers.set_miner(sender, ping.is_miner);

        let peers: Vec<PeerAddress> = self
            .peers
            .sample_alive_peers(self.settings.fanout, Some(sender))
            .into_iter()
            .map(|(address, _)| address.clone())
            .collect();
        origin.send(self.envelope(Message::Peers(Peers { peers })));

        if ping.block_height < self.chain.height() {
            let missing = self.chain.blocks_after(ping.block_height);
            info!(peer = %sender, from = ping.block_height + 1, count = missing.len(), "Sending missing blocks");
            for block in missing {
                origin.send(self.envelope(Message::Block(block.clone())));
            }
        }
    }

    /// Dials every listed peer that is not already known.
    fn handle_peers(&mut self, peers: Peers, dialer: &mut impl Dialer) {
        debug!(count = peers.peers.len(), "Received peers");
        for address in peers.peers {
            if self.is_known(&address) {
                continue;
            }
            info!(peer = %address, "Connecting to new peer");
            self.dialing.insert(address.clone());
            dialer.dial(address);
        }
    }

    /// Validates, de-duplicates and relays a transaction. Returns whether it
    /// was added to the pending set.
    pub fn handle_transaction(&mut self, tx: Transaction, sender: Option<&PeerAddress>) -> bool {
        if let Err(error) = self.admit_transaction(&tx) {
            warn!(%error, "Dropped transaction");
            return false;
        }
        if self.chain.contains_transaction(&tx) {
            debug!("Transaction already pending");
            return false;
        }
        info!(sender = %tx.sender, recipient = %tx.recipient, amount = tx.amount, "Received transaction");
        self.chain.push_transaction(tx.clone());
        self.broadcast(Message::Transaction(tx), sender);
        true
    }

    /// Appends a peer's block and relays it. Blocks already on the chain are
    /// ignored. Without strict mode nothing else is checked.
    pub fn handle_block(&mut self, block: Block, sender: Option<&PeerAddress>) -> bool {
        if self.chain.contains_block(block.hash()) {
            debug!(hash = %block.hash(), "Block already known");
            return false;
        }
        if let Err(error) = self.admit_block(&block) {
            warn!(%error, height = block.height(), hash = %block.hash(), "Rejected block");
            return false;
        }
        info!(height = block.height(), hash = %block.hash(), "Received new block");
        self.chain.add_block(block.clone());
        self.broadcast(Message::Block(block), sender);
        true
    }

    fn admit_transaction(&self, tx: &Transaction) -> NodeResult<()> {
        if self.validator.validate_transaction(tx) {
            Ok(())
        } else {
            Err(NodeError::Validation(format!(
                "transaction {} -> {} ({}) refused by validator",
                tx.sender, tx.recipient, tx.amount
            )))
        }
    }

    /// Baseline accepts any block; strict mode requires it to extend the tip.
    fn admit_block(&mut self, block: &Block) -> NodeResult<()> {
        if self.settings.strict_blocks {
            self.chain.validate_block(block)?;
            self.chain.recalculate_target(block.height())?;
        }
        Ok(())
    }

    /// Relays a block this node mined itself.
    pub fn announce_block(&self, block: &Block) {
        let sent = self.broadcast(Message::Block(block.clone()), None);
        debug!(height = block.height(), peers = sent, "Announced mined block");
    }

    pub fn on_connected(&mut self, address: PeerAddress, handle: PeerHandle) {
        self.dialing.remove(&address);
        let ping = self.ping_envelope();
        self.peers.add_peer(address, handle.clone());
        handle.send(ping);
    }

    pub fn on_dial_failed(&mut self, address: &PeerAddress, error: &str) {
        self.dialing.remove(address);
        warn!(peer = %address, %error, "Could not connect to peer");
    }

    pub fn on_closed(&mut self, connection: ConnectionId) {
        let removed = self.peers.remove_connection(connection);
        debug!(connection, removed, "Connection closed");
    }

    pub fn ping_envelope(&self) -> Envelope {
        self.envelope(Message::Ping(Ping {
            block_height: self.chain.height(),
            is_miner: self.is_miner,
            peer_count: Some(self.peers.alive_peers().count()),
        }))
    }

    pub fn envelope(&self, message: Message) -> Envelope {
        Envelope::new(message, self.identity.clone())
    }

    /// Sends `message` to up to `fanout` alive peers, never back to `except`.
    fn broadcast(&self, message: Message, except: Option<&PeerAddress>) -> usize {
        let envelope = self.envelope(message);
        self.peers
            .sample_alive_peers(self.settings.fanout, except)
            .into_iter()
            .filter(|(_, entry)| entry.handle.send(envelope.clone()))
            .count()
    }
}
