//! Shared helpers for ledger-node integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ledger_core::{Block, Chain};
use ledger_node::protocol::{Envelope, EnvelopeCodec, Message, PeerAddress, Ping};
use ledger_node::{Node, NodeConfig, NodeHandle, NodeResult};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

pub const STEP: Duration = Duration::from_secs(10);
pub const QUIET: Duration = Duration::from_millis(300);
const POLL: Duration = Duration::from_millis(20);

pub struct RunningNode {
    pub handle: NodeHandle,
    pub addr: SocketAddr,
    pub identity: PeerAddress,
    pub http: Option<SocketAddr>,
    pub task: JoinHandle<NodeResult<()>>,
}

impl RunningNode {
    pub async fn height(&self) -> u64 {
        self.handle.head().await.expect("node stopped").height
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.handle.blocks(None).await.expect("node stopped")
    }

    pub async fn wait_for_height(&self, height: u64) {
        let reached = timeout(STEP, async {
            while self.height().await < height {
                tokio::time::sleep(POLL).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for height {height}");
    }

    pub async fn wait_for_pending(&self, pending: usize) {
        let reached = timeout(STEP, async {
            while self.handle.head().await.expect("node stopped").pending < pending {
                tokio::time::sleep(POLL).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for {pending} pending transactions");
    }

    pub async fn wait_for_peer(&self, peer: &PeerAddress) {
        let registered = timeout(STEP, async {
            while !self.handle.peers().await.expect("node stopped").contains(peer) {
                tokio::time::sleep(POLL).await;
            }
        })
        .await;
        assert!(registered.is_ok(), "timed out waiting for peer {peer}");
    }

    pub async fn wait_until_unregistered(&self, peer: &PeerAddress) {
        let removed = timeout(STEP, async {
            while self.handle.peers().await.expect("node stopped").contains(peer) {
                tokio::time::sleep(POLL).await;
            }
        })
        .await;
        assert!(removed.is_ok(), "peer {peer} still registered");
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        timeout(STEP, self.task)
            .await
            .expect("node did not stop")
            .expect("node task panicked")
            .expect("node returned an error");
    }
}

/// Loopback node that does not mine.
pub fn relay_config() -> NodeConfig {
    NodeConfig {
        mining_enabled: false,
        ..NodeConfig::local()
    }
}

pub async fn start_node(config: NodeConfig) -> RunningNode {
    let node = Node::bind(config).await.expect("bind node");
    let addr = node.local_addr().expect("local addr");
    let identity = node.identity().clone();
    let http = node.http_addr();
    let handle = node.handle();
    let task = tokio::spawn(node.run());
    RunningNode {
        handle,
        addr,
        identity,
        http,
        task,
    }
}

/// Mines `count` blocks on top of `chain`.
pub async fn mine_blocks(chain: &mut Chain, count: usize) -> Vec<Block> {
    let mut mined = Vec::with_capacity(count);
    for _ in 0..count {
        mined.push(chain.mine().await);
    }
    mined
}

/// A hand-driven peer speaking the wire protocol over a raw TCP connection.
pub struct RawPeer {
    pub address: PeerAddress,
    framed: Framed<TcpStream, EnvelopeCodec>,
}

impl RawPeer {
    /// Connects to `node`, advertising `127.0.0.1:advertised_port`.
    pub async fn connect(node: SocketAddr, advertised_port: u16) -> Self {
        let stream = TcpStream::connect(node).await.expect("connect to node");
        Self {
            address: PeerAddress::new("127.0.0.1", advertised_port),
            framed: Framed::new(stream, EnvelopeCodec::new()),
        }
    }

    pub fn from_stream(stream: TcpStream, address: PeerAddress) -> Self {
        Self {
            address,
            framed: Framed::new(stream, EnvelopeCodec::new()),
        }
    }

    pub async fn send(&mut self, message: Message) {
        let envelope = Envelope::new(message, self.address.clone());
        self.framed.send(envelope).await.expect("send envelope");
    }

    pub async fn ping(&mut self, block_height: u64) {
        self.send(Message::Ping(Ping {
            block_height,
            is_miner: false,
            peer_count: None,
        }))
        .await;
    }

    /// Next message from the node, failing after `STEP`.
    pub async fn recv(&mut self) -> Message {
        timeout(STEP, self.framed.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("undecodable message")
            .message
    }

    /// Asserts the node sends nothing for a short while.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(frame)) = timeout(QUIET, self.framed.next()).await {
            panic!("unexpected message: {frame:?}");
        }
    }

    /// Shuts down the write half; the node can still reply.
    pub async fn close_write(&mut self) {
        self.framed.get_mut().shutdown().await.expect("shut down write half");
    }

    /// Every message the node sends until it closes the connection.
    pub async fn recv_until_closed(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        loop {
            match timeout(STEP, self.framed.next()).await.expect("connection left open") {
                Some(Ok(envelope)) => messages.push(envelope.message),
                Some(Err(_)) | None => return messages,
            }
        }
    }
}
