//! Node runtime: the owner loop, connection tasks and outbound dialing.
//!
//! One task owns the [`NodeState`]. Connection readers, dial tasks and HTTP
//! handlers send it [`Command`]s; it answers synchronously and queues
//! outbound envelopes on per-connection writers. Between commands it makes
//! one mining attempt and yields.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ledger_core::{Block, Chain, Miner, Transaction};
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::api;
use crate::config::NodeConfig;
use crate::constants::{COMMAND_CHANNEL_CAPACITY, PEER_OUTBOUND_CAPACITY, WRITER_DRAIN_TIMEOUT};
use crate::discovery::{resolve_external_ip, HttpIpDiscovery, IpDiscovery, StaticIp};
use crate::error::{NodeError, NodeResult};
use crate::gossip::Dialer;
use crate::protocol::{Envelope, EnvelopeCodec, PeerAddress};
use crate::registry::{ConnectionId, PeerHandle};
use crate::shutdown::{shutdown_channel, ShutdownRx, ShutdownTx};
use crate::state::NodeState;
use crate::validator::{StructuralValidator, TransactionValidator};

/// Everything the owner loop reacts to besides its own listener.
pub enum Command {
    /// A decoded envelope, in arrival order per connection.
    Inbound {
        envelope: Envelope,
        handle: PeerHandle,
    },
    /// The reader stopped; every address the connection serves is dropped.
    Closed { connection: ConnectionId },
    Connected {
        address: PeerAddress,
        handle: PeerHandle,
    },
    DialFailed {
        address: PeerAddress,
        error: String,
    },
    Query(Query),
}

/// Requests from outside the gossip protocol, answered on a one-shot channel.
pub enum Query {
    Head(oneshot::Sender<ChainHead>),
    Blocks {
        from: Option<u64>,
        reply: oneshot::Sender<Vec<Block>>,
    },
    Peers(oneshot::Sender<Vec<PeerAddress>>),
    SubmitTransaction {
        tx: Transaction,
        reply: oneshot::Sender<bool>,
    },
}

/// Summary of the local chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub height: u64,
    pub hash: String,
    pub target: String,
    pub pending: usize,
}

/// Cloneable access to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    shutdown: ShutdownTx,
}

impl NodeHandle {
    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Query) -> NodeResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Query(build(reply)))
            .await
            .map_err(|_| NodeError::Shutdown)?;
        response.await.map_err(|_| NodeError::Shutdown)
    }

    pub async fn head(&self) -> NodeResult<ChainHead> {
        self.query(Query::Head).await
    }

    /// Blocks above `from`, or the whole chain.
    pub async fn blocks(&self, from: Option<u64>) -> NodeResult<Vec<Block>> {
        self.query(|reply| Query::Blocks { from, reply }).await
    }

    pub async fn peers(&self) -> NodeResult<Vec<PeerAddress>> {
        self.query(Query::Peers).await
    }

    /// Same path as a gossiped transaction. Returns whether it became pending.
    pub async fn submit_transaction(&self, tx: Transaction) -> NodeResult<bool> {
        self.query(|reply| Query::SubmitTransaction { tx, reply }).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn shutdown_sender(&self) -> ShutdownTx {
        self.shutdown.clone()
    }

    /// Resolves once the owner loop has stopped.
    pub async fn stopped(&self) {
        self.commands.closed().await
    }
}

/// Spawns connection tasks and hands out connection ids.
#[derive(Clone)]
struct Connections {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    idle_timeout: Option<Duration>,
    connect_timeout: Duration,
}

impl Connections {
    /// Starts the reader and writer tasks of `stream`. `address` is known up
    /// front for connections this node dialed; the reader then reports
    /// [`Command::Connected`] before anything it reads.
    fn spawn(&self, stream: TcpStream, dialed: Option<PeerAddress>) -> PeerHandle {
        let connection = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = stream.set_nodelay(true) {
            debug!(connection, %error, "Could not set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(PEER_OUTBOUND_CAPACITY);
        let handle = PeerHandle::new(connection, outbound_tx);

        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, EnvelopeCodec::new()),
            outbound_rx,
            connection,
        ));
        let reader = ReadLoop {
            frames: FramedRead::new(read_half, EnvelopeCodec::new()),
            handle: handle.clone(),
            address: dialed.clone(),
            dialed,
            commands: self.commands.clone(),
            idle_timeout: self.idle_timeout,
        };
        tokio::spawn(async move {
            // The writer ends once the reader and the registry have dropped
            // their handles, after flushing what is already queued.
            let stalled = reader.run().await;
            let abort = writer.abort_handle();
            if stalled || tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                debug!(connection, "Dropping unsent envelopes");
                abort.abort();
            }
        });
        handle
    }
}

impl Dialer for Connections {
    fn dial(&mut self, address: PeerAddress) {
        let connections = self.clone();
        tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(connections.connect_timeout, TcpStream::connect(address.to_string()))
                    .await;
            let command = match outcome {
                Ok(Ok(stream)) => {
                    debug!(peer = %address, "Outbound connection established");
                    connections.spawn(stream, Some(address));
                    return;
                }
                Ok(Err(error)) => Command::DialFailed {
                    address,
                    error: error.to_string(),
                },
                Err(_) => Command::DialFailed {
                    address,
                    error: "connect timed out".to_string(),
                },
            };
            let _ = connections.commands.send(command).await;
        });
    }
}

struct ReadLoop {
    frames: FramedRead<OwnedReadHalf, EnvelopeCodec>,
    handle: PeerHandle,
    /// Last address the peer went by, for logging.
    address: Option<PeerAddress>,
    dialed: Option<PeerAddress>,
    commands: mpsc::Sender<Command>,
    idle_timeout: Option<Duration>,
}

impl ReadLoop {
    /// Reads until the peer goes away. Returns true when the connection was
    /// dropped for not keeping up with its outbound queue.
    async fn run(mut self) -> bool {
        let connection = self.handle.id();
        if let Some(address) = self.dialed.take() {
            let command = Command::Connected {
                address,
                handle: self.handle.clone(),
            };
            if self.commands.send(command).await.is_err() {
                return false;
            }
        }
        let mut stalled = false;
        loop {
            let frame = tokio::select! {
                _ = self.commands.closed() => return false,
                _ = self.handle.stalled() => {
                    warn!(connection, peer = ?self.address, "Closing stalled connection");
                    stalled = true;
                    break;
                }
                frame = next_frame(&mut self.frames, self.idle_timeout) => frame,
            };
            match frame {
                Ok(Some(envelope)) => {
                    self.address = Some(envelope.sender.clone());
                    let command = Command::Inbound {
                        envelope,
                        handle: self.handle.clone(),
                    };
                    if self.commands.send(command).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => {
                    debug!(connection, peer = ?self.address, "Peer closed connection");
                    break;
                }
                Err(error) => {
                    warn!(connection, peer = ?self.address, %error, "Closing connection");
                    break;
                }
            }
        }
        let _ = self.commands.send(Command::Closed { connection }).await;
        stalled
    }
}

async fn next_frame(
    frames: &mut FramedRead<OwnedReadHalf, EnvelopeCodec>,
    idle_timeout: Option<Duration>,
) -> NodeResult<Option<Envelope>> {
    let frame = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, frames.next())
            .await
            .map_err(|_| NodeError::Transport(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")))?,
        None => frames.next().await,
    };
    frame.transpose()
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
    mut outbound: mpsc::Receiver<Envelope>,
    connection: ConnectionId,
) {
    while let Some(envelope) = outbound.recv().await {
        if let Err(error) = sink.send(envelope).await {
            debug!(connection, %error, "Write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

pub struct Node {
    listener: TcpListener,
    http: Option<TcpListener>,
    state: NodeState,
    config: NodeConfig,
    commands: mpsc::Sender<Command>,
    inbox: mpsc::Receiver<Command>,
    shutdown: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl Node {
    /// Binds the listeners and resolves the advertised address. The external
    /// IP comes from `--external-ip` when given, an HTTP lookup otherwise.
    pub async fn bind(config: NodeConfig) -> NodeResult<Self> {
        match config.external_ip.clone() {
            Some(ip) => Self::bind_with(config, StructuralValidator, StaticIp(ip)).await,
            None => {
                let discovery = HttpIpDiscovery::new(&config.ip_lookup_url, config.connect_timeout)?;
                Self::bind_with(config, StructuralValidator, discovery).await
            }
        }
    }

    pub async fn bind_with(
        config: NodeConfig,
        validator: impl TransactionValidator + 'static,
        discovery: impl IpDiscovery,
    ) -> NodeResult<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        let port = listener.local_addr()?.port();
        let http = match config.http_listen {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };

        let ip = resolve_external_ip(&discovery).await;
        let identity = PeerAddress::new(ip, port);
        let state = NodeState::new(
            Chain::with_target(config.initial_target.clone()),
            identity,
            config.mining_enabled,
        )
        .with_settings(config.gossip)
        .with_validator(validator);

        let (commands, inbox) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = shutdown_channel();
        Ok(Self {
            listener,
            http,
            state,
            config,
            commands,
            inbox,
            shutdown,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> NodeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// The address this node puts in `meta.address`.
    pub fn identity(&self) -> &PeerAddress {
        self.state.identity()
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.commands.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Runs until the shutdown signal, then closes every connection.
    pub async fn run(self) -> NodeResult<()> {
        let handle = self.handle();
        let Node {
            listener,
            http,
            mut state,
            config,
            commands,
            mut inbox,
            shutdown: _shutdown,
            mut shutdown_rx,
        } = self;

        let mut connections = Connections {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            idle_timeout: config.idle_timeout,
            connect_timeout: config.connect_timeout,
        };

        let api_task = http.map(|listener| tokio::spawn(api::serve(listener, handle)));

        for peer in config.bootstrap_peers {
            if state.is_known(&peer) {
                continue;
            }
            info!(peer = %peer, "Connecting to bootstrap peer");
            state.dialing.insert(peer.clone());
            connections.dial(peer);
        }

        let mut miner = config.mining_enabled.then(Miner::new);
        info!(
            identity = %state.identity(),
            mining = miner.is_some(),
            fanout = state.settings().fanout,
            strict_blocks = state.settings().strict_blocks,
            "Node started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let handle = connections.spawn(stream, None);
                        debug!(%remote, connection = handle.id(), "Accepted connection");
                    }
                    Err(error) => warn!(%error, "Accept failed"),
                },

                Some(command) = inbox.recv() => {
                    dispatch(&mut state, command, &mut connections);
                }

                _ = tokio::task::yield_now(), if miner.is_some() => {
                    if let Some(block) = miner.as_mut().and_then(|m| m.step(&mut state.chain)) {
                        state.announce_block(&block);
                    }
                }
            }
        }

        state.peers.close_all();
        drop(inbox);
        if let Some(task) = api_task {
            match task.await {
                Ok(result) => result?,
                Err(error) => warn!(%error, "HTTP API task failed"),
            }
        }
        info!(height = state.chain.height(), "Node stopped");
        Ok(())
    }
}

fn dispatch(state: &mut NodeState, command: Command, dialer: &mut impl Dialer) {
    match command {
        Command::Inbound { envelope, handle } => state.on_envelope(envelope, &handle, dialer),
        Command::Closed { connection } => state.on_closed(connection),
        Command::Connected { address, handle } => state.on_connected(address, handle),
        Command::DialFailed { address, error } => state.on_dial_failed(&address, &error),
        Command::Query(query) => answer(state, query),
    }
}

fn answer(state: &mut NodeState, query: Query) {
    match query {
        Query::Head(reply) => {
            let tip = state.chain.last_block();
            let _ = reply.send(ChainHead {
                height: state.chain.height(),
                hash: tip.hash().to_string(),
                target: state.chain.target().to_hex(),
                pending: state.chain.pending().len(),
            });
        }
        Query::Blocks { from, reply } => {
            let blocks = match from {
                Some(height) => state.chain.blocks_after(height),
                None => state.chain.blocks(),
            };
            let _ = reply.send(blocks.to_vec());
        }
        Query::Peers(reply) => {
            let mut peers: Vec<PeerAddress> = state.peers.addresses().cloned().collect();
            peers.sort();
            let _ = reply.send(peers);
        }
        Query::SubmitTransaction { tx, reply } => {
            let _ = reply.send(state.handle_transaction(tx, None));
        }
    }
}
