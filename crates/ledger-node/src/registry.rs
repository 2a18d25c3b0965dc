//! Live peer connections keyed by advertised address.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, PeerAddress};

/// Identifies one TCP connection for its whole lifetime.
pub type ConnectionId = u64;

/// Sending side of a connection. Envelopes are queued for the connection's
/// writer task, so sending never waits on the socket. A peer that lets its
/// queue fill up is marked stalled and its reader closes the connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Envelope>,
    stalled: Arc<AtomicBool>,
    stall_notify: Arc<Notify>,
}

impl PeerHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            id,
            outbound,
            stalled: Arc::new(AtomicBool::new(false)),
            stall_notify: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an envelope. Returns false once the writer is gone or the
    /// queue has overflowed.
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.stalled.load(Ordering::Acquire) {
            return false;
        }
        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.stalled.swap(true, Ordering::AcqRel) {
                    warn!(connection = self.id, "Outbound queue full, dropping peer");
                    self.stall_notify.notify_one();
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stalled.load(Ordering::Acquire) || self.outbound.is_closed()
    }

    /// Resolves once a send has found the outbound queue full.
    pub async fn stalled(&self) {
        if self.stalled.load(Ordering::Acquire) {
            return;
        }
        self.stall_notify.notified().await
    }
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub handle: PeerHandle,
    /// Last `is_miner` flag the peer advertised in a ping.
    pub is_miner: Option<bool>,
    /// Position in insertion order; kept when the handle is replaced.
    seq: u64,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerAddress, PeerEntry>,
    next_seq: u64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `address`, replacing any previous connection
    /// for that address.
    pub fn add_peer(&mut self, address: PeerAddress, handle: PeerHandle) {
        match self.peers.get_mut(&address) {
            Some(entry) if entry.handle.id() == handle.id() => {}
            Some(entry) => {
                debug!(%address, old = entry.handle.id(), new = handle.id(), "Replacing peer connection");
                entry.handle = handle;
            }
            None => {
                info!(%address, connection = handle.id(), "Added peer to pool");
                let seq = self.next_seq;
                self.next_seq += 1;
                self.peers.insert(
                    address,
                    PeerEntry {
                        handle,
                        is_miner: None,
                        seq,
                    },
                );
            }
        }
    }

    /// Removes `address`. Absent addresses are a no-op.
    pub fn remove_peer(&mut self, address: &PeerAddress) -> Option<PeerEntry> {
        let removed = self.peers.remove(address);
        if removed.is_some() {
            info!(%address, "Removed peer from pool");
        }
        removed
    }

    /// Removes every address still served by `connection`. A dialed peer can
    /// sit under both the dialed and the advertised address. Entries already
    /// replaced by a newer connection are left alone.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let before = self.peers.len();
        self.peers.retain(|address, entry| {
            let keep = entry.handle.id() != connection;
            if !keep {
                info!(%address, connection, "Removed peer from pool");
            }
            keep
        });
        before - self.peers.len()
    }

    pub fn set_miner(&mut self, address: &PeerAddress, is_miner: bool) {
        if let Some(entry) = self.peers.get_mut(address) {
            entry.is_miner = Some(is_miner);
        }
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.contains_key(address)
    }

    pub fn get(&self, address: &PeerAddress) -> Option<&PeerEntry> {
        self.peers.get(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Entries whose writer is still running, oldest first.
    pub fn alive_peers(&self) -> impl Iterator<Item = (&PeerAddress, &PeerEntry)> {
        let mut alive: Vec<_> = self
            .peers
            .iter()
            .filter(|(_, entry)| !entry.handle.is_closed())
            .collect();
        alive.sort_by_key(|(_, entry)| entry.seq);
        alive.into_iter()
    }

    /// Up to `n` alive entries other than `except`, one per connection, no
    /// recency or liveness weighting.
    pub fn sample_alive_peers(
        &self,
        n: usize,
        except: Option<&PeerAddress>,
    ) -> Vec<(&PeerAddress, &PeerEntry)> {
        let excluded = except
            .and_then(|address| self.peers.get(address))
            .map(|entry| entry.handle.id());
        let mut connections = HashSet::new();
        self.alive_peers()
            .filter(|(address, entry)| Some(*address) != except && Some(entry.handle.id()) != excluded)
            .filter(|(_, entry)| connections.insert(entry.handle.id()))
            .take(n)
            .collect()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &PeerAddress> {
        self.peers.keys()
    }

    /// Drops every handle; writer tasks finish and their sockets close.
    pub fn close_all(&mut self) {
        let count = self.peers.len();
        self.peers.clear();
        info!(count, "Closed all peer connections");
    }
}
