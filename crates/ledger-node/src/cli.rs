//! Command-line argument parsing.

use std::net::SocketAddr;

use clap::Parser;
use ledger_core::Target;

use crate::constants::{DEFAULT_GOSSIP_FANOUT, DEFAULT_IP_LOOKUP_URL};
use crate::protocol::PeerAddress;

/// Gossip ledger node.
#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-node")]
#[command(about = "Proof-of-work ledger node with peer-to-peer gossip")]
#[command(version)]
pub struct Cli {
    /// Gossip listen address.
    #[arg(long, default_value = "0.0.0.0:8888")]
    pub listen: SocketAddr,

    /// HTTP status API listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub http_listen: SocketAddr,

    /// Do not serve the HTTP status API.
    #[arg(long)]
    pub no_http: bool,

    /// Peer to connect to at startup, `ip:port`. Repeatable.
    #[arg(long = "peer")]
    pub peers: Vec<PeerAddress>,

    /// IP to advertise to peers. Looked up over HTTP when absent.
    #[arg(long)]
    pub external_ip: Option<String>,

    /// Plain-text service answering with the caller's public IP.
    #[arg(long, default_value = DEFAULT_IP_LOOKUP_URL)]
    pub ip_lookup_url: String,

    /// Relay and sync only, never mine.
    #[arg(long)]
    pub no_mine: bool,

    /// Peers per rebroadcast and per `peers` reply.
    #[arg(long, default_value_t = DEFAULT_GOSSIP_FANOUT)]
    pub gossip_fanout: usize,

    /// Check linkage, target and proof-of-work before accepting peer blocks.
    #[arg(long)]
    pub strict_blocks: bool,

    /// Close connections silent for this many seconds. 0 disables.
    #[arg(long, default_value_t = 0)]
    pub idle_timeout_secs: u64,

    /// Starting target as up to 64 hex digits.
    #[arg(long)]
    pub initial_target: Option<Target>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
